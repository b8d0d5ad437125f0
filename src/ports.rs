use anyhow::{bail, Context, Result};
use std::collections::HashSet;

/// Ports probed when the operator does not pass a list.
pub const DEFAULT_PORTS: &str = "443,636,587,8443";

/// Parse a comma-separated port list into a deduplicated list of TCP ports (1..=65535).
///
/// Supported items:
/// - single port number: `443`
/// - inclusive range: `8440-8445`
/// - whitespace and empty items are ignored
pub fn parse_port_list(s: &str) -> Result<Vec<u16>> {
    let mut out: Vec<u16> = Vec::new();
    let mut seen = HashSet::new();

    for (idx, raw) in s.split(',').enumerate() {
        let item = raw.trim();
        if item.is_empty() {
            continue;
        }
        let pos = idx + 1;

        // Range `start-end`
        if let Some((a, b)) = item.split_once('-') {
            let start = parse_port_str(a.trim())
                .with_context(|| format!("item {pos}: invalid start in range: {a}"))?;
            let end = parse_port_str(b.trim())
                .with_context(|| format!("item {pos}: invalid end in range: {b}"))?;
            if start > end {
                bail!("item {pos}: invalid range {start}-{end} (start > end)");
            }
            for p in start..=end {
                if seen.insert(p) {
                    out.push(p);
                }
            }
            continue;
        }

        let p = parse_port_str(item)
            .with_context(|| format!("item {pos}: invalid port value: {item}"))?;
        if seen.insert(p) {
            out.push(p);
        }
    }

    if out.is_empty() {
        bail!("port list is empty");
    }
    Ok(out)
}

fn parse_port_str(s: &str) -> Result<u16> {
    let val: u32 = s.parse::<u32>().map_err(|e| anyhow::anyhow!(e))?;
    if val == 0 || val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}
