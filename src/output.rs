use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use crate::types::CertificateRecord;

const DNS_NAMES_WIDTH: usize = 20;
const ISSUER_WIDTH: usize = 30;

/// Presentation settings for the console table.
#[derive(Debug, Clone, Copy)]
pub struct TableStyle {
    pub color: bool,
}

impl Default for TableStyle {
    fn default() -> Self {
        Self { color: true }
    }
}

const HEADERS: [&str; 9] = [
    "HostIP:Port",
    "HostDNS (reverse)",
    "DNS Match Cert",
    "SNI Verified",
    "CertDNSNames",
    "Subject Common Name",
    "Issuer",
    "Expiry ↓",
    "Expired",
];

/// Cell tone; `Good`/`Bad` are coloured when the style allows it.
#[derive(Clone, Copy)]
enum Tone {
    Plain,
    Good,
    Bad,
}

/// Render records as an aligned text table, one row per certificate.
pub fn render_table(records: &[CertificateRecord], style: TableStyle) -> String {
    let rows: Vec<[(String, Tone); 9]> = records.iter().map(|r| table_row(r, true)).collect();

    let mut widths = HEADERS.map(|h| h.chars().count());
    for row in &rows {
        for (w, (text, _)) in widths.iter_mut().zip(row.iter()) {
            *w = (*w).max(text.chars().count());
        }
    }

    let mut out = String::new();
    let header: Vec<String> = HEADERS
        .iter()
        .zip(widths.iter())
        .map(|(h, &w)| pad(h, w))
        .collect();
    out.push_str(header.join("  ").trim_end());
    out.push('\n');
    let rule: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    out.push_str(&rule.join("  "));
    out.push('\n');

    for row in &rows {
        let cells: Vec<String> = row
            .iter()
            .zip(widths.iter())
            .map(|((text, tone), &w)| paint(&pad(text, w), *tone, style))
            .collect();
        out.push_str(cells.join("  ").trim_end());
        out.push('\n');
    }
    out
}

fn table_row(r: &CertificateRecord, truncate: bool) -> [(String, Tone); 9] {
    let clip = |s: String, max: usize| if truncate { truncate_text(&s, max) } else { s };
    [
        (format!("{}:{}", r.host_ip, r.host_port), Tone::Plain),
        (r.host_dns.clone(), Tone::Plain),
        flag(r.hostname_verified, true),
        flag(r.sni_verified, true),
        (clip(r.dns_names.join(", "), DNS_NAMES_WIDTH), Tone::Plain),
        (r.subject_common_name.clone(), Tone::Plain),
        (clip(r.issuer.clone(), ISSUER_WIDTH), Tone::Plain),
        (format_local(r.expiry), Tone::Plain),
        flag(r.expired, false),
    ]
}

fn flag(value: bool, good_when: bool) -> (String, Tone) {
    let tone = if value == good_when { Tone::Good } else { Tone::Bad };
    (value.to_string(), tone)
}

fn pad(text: &str, width: usize) -> String {
    let len = text.chars().count();
    format!("{text}{}", " ".repeat(width.saturating_sub(len)))
}

fn paint(text: &str, tone: Tone, style: TableStyle) -> String {
    if !style.color {
        return text.to_string();
    }
    match tone {
        Tone::Plain => text.to_string(),
        Tone::Good => text.green().to_string(),
        Tone::Bad => text.red().to_string(),
    }
}

/// Truncate to `max` characters, marking the cut with `...`.
pub fn truncate_text(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push_str("...");
    out
}

/// Expiry in the local timezone, or UTC when the local offset is unknown.
pub fn format_local(ts: OffsetDateTime) -> String {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let fmt = format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second] [offset_hour sign:mandatory]:[offset_minute]"
    );
    ts.to_offset(offset)
        .format(fmt)
        .unwrap_or_else(|_| ts.to_string())
}

#[derive(Serialize)]
struct JsonReport<'a> {
    certs: &'a [CertificateRecord],
    #[serde(rename = "dateTime", with = "time::serde::rfc3339")]
    date_time: OffsetDateTime,
}

/// Serialize records as `{ "certs": [...], "dateTime": ... }`.
pub fn render_json(records: &[CertificateRecord], date_time: OffsetDateTime) -> Result<String> {
    let report = JsonReport {
        certs: records,
        date_time,
    };
    Ok(serde_json::to_string_pretty(&report)?)
}

pub fn write_json(path: &Path, records: &[CertificateRecord]) -> Result<()> {
    let json = render_json(records, OffsetDateTime::now_utc())?;
    let mut file = File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(json.as_bytes())?;
    Ok(())
}

/// Standalone HTML page with one table row per certificate.
pub fn render_html(records: &[CertificateRecord]) -> String {
    let mut html = String::from(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>TLS certificates</title>\n\
         <style>\n\
         body { font-family: sans-serif; }\n\
         table { border-collapse: collapse; }\n\
         th, td { border: 1px solid #ccc; padding: 4px 8px; text-align: left; }\n\
         .bad { color: #c00; }\n\
         .good { color: #080; }\n\
         </style>\n</head>\n<body>\n<table>\n<tr>",
    );
    for h in HEADERS {
        html.push_str(&format!("<th>{}</th>", escape_html(h)));
    }
    html.push_str("</tr>\n");

    for r in records {
        html.push_str("<tr>");
        for (text, tone) in table_row(r, false) {
            let class = match tone {
                Tone::Plain => "",
                Tone::Good => " class=\"good\"",
                Tone::Bad => " class=\"bad\"",
            };
            html.push_str(&format!("<td{class}>{}</td>", escape_html(&text)));
        }
        html.push_str("</tr>\n");
    }
    html.push_str("</table>\n</body>\n</html>\n");
    html
}

pub fn write_html(path: &Path, records: &[CertificateRecord]) -> Result<()> {
    std::fs::write(path, render_html(records))
        .with_context(|| format!("failed to write {}", path.display()))
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn record() -> CertificateRecord {
        CertificateRecord {
            hostname_verified: true,
            subject_common_name: "web.lan".into(),
            dns_names: vec!["web.lan".into(), "www.web.lan".into(), "api.web.lan".into()],
            ip_addresses: vec![],
            issuer: "CN=Some Very Long Internal Issuing Authority, O=Corp".into(),
            expiry: datetime!(2026-03-01 12:00 UTC),
            expired: false,
            host_dns: "web.lan".into(),
            host_ip: "10.0.0.5".into(),
            host_port: "443".into(),
            sni_verified: false,
        }
    }

    #[test]
    fn truncate_marks_cut() {
        assert_eq!(truncate_text("short", 20), "short");
        assert_eq!(truncate_text("abcdef", 3), "abc...");
    }

    #[test]
    fn table_has_header_and_truncated_cells() {
        let table = render_table(&[record()], TableStyle { color: false });
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("HostIP:Port"));
        assert!(lines[2].contains("10.0.0.5:443"));
        assert!(lines[2].contains("web.lan, www.web.lan..."));
        assert!(lines[2].contains("CN=Some Very Long Internal Iss..."));
        assert!(!table.contains('\u{1b}'));
    }

    #[test]
    fn json_uses_report_field_names() {
        let json = render_json(&[record()], datetime!(2026-01-01 0:00 UTC)).unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["dateTime"], "2026-01-01T00:00:00Z");
        let cert = &v["certs"][0];
        assert_eq!(cert["hostnameVerified"], true);
        assert_eq!(cert["sniVerified"], false);
        assert_eq!(cert["hostDNS"], "web.lan");
        assert_eq!(cert["hostIP"], "10.0.0.5");
        assert_eq!(cert["hostPort"], "443");
        assert_eq!(cert["expiry"], "2026-03-01T12:00:00Z");
        assert_eq!(cert["dnsNames"][1], "www.web.lan");
    }

    #[test]
    fn html_escapes_cells() {
        let mut r = record();
        r.subject_common_name = "<script>".into();
        let html = render_html(&[r]);
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
    }
}
