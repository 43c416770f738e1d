//! Consolidation of the administrative activity and audit logs.
//!
//! Log objects are processed in name order and the first row seen for a
//! request identifier wins, because later objects may re-send stale rows.
//! An object that cannot be fetched or parsed is skipped and reported; it
//! never aborts the rest of the merge.

use crate::store::{ObjectDescriptor, ObjectStore};
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::ser::{Formatter, PrettyFormatter};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::{debug, info, warn};

pub const ACTIVITY_PREFIX: &str = "activities";
pub const AUDIT_PREFIX: &str = "audittrail";

pub const ACTIVITY_FIELDS: [&str; 15] = [
    "Account",
    "Container",
    "Time",
    "Remote IP",
    "Requester",
    "Request ID",
    "Operation",
    "Object",
    "Hash Algorithm",
    "Hash",
    "Request-URI",
    "HTTP Status",
    "Bytes Sent",
    "Byte Received",
    "Total Time",
];

/// Position of the request identifier in an activity row.
const REQUEST_ID: usize = 5;

#[derive(Clone, Debug, Default)]
pub struct MergeReport {
    pub objects: usize,
    pub records: usize,
    pub duplicates: usize,
    /// `(object name, reason)` for every object left out of the output.
    pub skipped: Vec<(String, String)>,
}

fn sorted_objects(
    store: &dyn ObjectStore,
    account: &str,
    prefix: &str,
) -> Result<Vec<ObjectDescriptor>> {
    let mut objs = store
        .list_objects(account, Some(prefix))
        .with_context(|| format!("list {}/{}*", account, prefix))?;
    objs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(objs)
}

fn fetch(
    store: &dyn ObjectStore,
    account: &str,
    name: &str,
    report: &mut MergeReport,
) -> Option<Vec<u8>> {
    debug!("GET <admin> <{}>/{}", account, name);
    match store.get_object(account, name) {
        Ok(b) => Some(b),
        Err(e) => {
            warn!(object = name, error = %e, "log object could not be fetched, skipped");
            report.skipped.push((name.to_string(), e.to_string()));
            None
        }
    }
}

/// Merge every `activities*` object of `account` into one CSV with a fixed header.
pub fn merge_activity_log(
    store: &dyn ObjectStore,
    account: &str,
    out: &Path,
) -> Result<MergeReport> {
    info!("Gathering activity logs");
    let mut w = csv::Writer::from_path(out).with_context(|| format!("create {:?}", out))?;
    w.write_record(ACTIVITY_FIELDS)?;

    let mut report = MergeReport::default();
    let mut seen: HashSet<String> = HashSet::new();
    for obj in sorted_objects(store, account, ACTIVITY_PREFIX)? {
        let Some(bytes) = fetch(store, account, &obj.name, &mut report) else {
            continue;
        };
        let rows = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::Fields)
            .from_reader(bytes.as_slice())
            .records()
            .collect::<Result<Vec<_>, _>>();
        let rows = match rows {
            Ok(r) => r,
            Err(e) => {
                warn!(object = %obj.name, error = %e, "activity log is not valid CSV, skipped");
                report.skipped.push((obj.name, e.to_string()));
                continue;
            }
        };
        report.objects += 1;
        for row in rows {
            let Some(id) = row.get(REQUEST_ID) else {
                continue;
            };
            if seen.insert(id.to_string()) {
                w.write_record(&row)?;
                report.records += 1;
            } else {
                report.duplicates += 1;
            }
        }
    }
    w.flush().with_context(|| format!("flush {:?}", out))?;
    info!(
        objects = report.objects,
        records = report.records,
        duplicates = report.duplicates,
        "activity log written to {}",
        out.display()
    );
    Ok(report)
}

/// Concatenate every `audittrail*` JSON object of `account`, pretty-printed
/// with sorted keys, each preceded by a comment line naming its source.
/// Non-ASCII text is written as `\uXXXX` escapes, so the file is plain ASCII.
pub fn merge_audit_log(store: &dyn ObjectStore, account: &str, out: &Path) -> Result<MergeReport> {
    info!("Gathering audit logs");
    let f = File::create(out).with_context(|| format!("create {:?}", out))?;
    let mut w = BufWriter::new(f);

    let mut report = MergeReport::default();
    for obj in sorted_objects(store, account, AUDIT_PREFIX)? {
        let Some(bytes) = fetch(store, account, &obj.name, &mut report) else {
            continue;
        };
        let doc: Value = match serde_json::from_slice(&bytes) {
            Ok(v) => v,
            Err(e) => {
                warn!(object = %obj.name, error = %e, "audit log is not valid JSON, skipped");
                report.skipped.push((obj.name, e.to_string()));
                continue;
            }
        };
        write!(w, "\n# Audit log: {}\n", obj.name)?;
        write_pretty(&mut w, &sort_keys(doc))?;
        report.objects += 1;
        report.records += 1;
    }
    w.flush().with_context(|| format!("flush {:?}", out))?;
    info!(objects = report.objects, "audit log written to {}", out.display());
    Ok(report)
}

fn write_pretty<W: Write>(w: &mut W, v: &Value) -> Result<()> {
    let fmt = AsciiPretty(PrettyFormatter::with_indent(b"    "));
    let mut ser = serde_json::Serializer::with_formatter(w, fmt);
    v.serialize(&mut ser)?;
    Ok(())
}

/// Four-space pretty printer whose strings escape every non-ASCII character
/// as `\uXXXX` (UTF-16 surrogate pairs above the basic plane).
struct AsciiPretty<'a>(PrettyFormatter<'a>);

impl Formatter for AsciiPretty<'_> {
    fn begin_array<W: ?Sized + Write>(&mut self, w: &mut W) -> io::Result<()> {
        self.0.begin_array(w)
    }

    fn end_array<W: ?Sized + Write>(&mut self, w: &mut W) -> io::Result<()> {
        self.0.end_array(w)
    }

    fn begin_array_value<W: ?Sized + Write>(&mut self, w: &mut W, first: bool) -> io::Result<()> {
        self.0.begin_array_value(w, first)
    }

    fn end_array_value<W: ?Sized + Write>(&mut self, w: &mut W) -> io::Result<()> {
        self.0.end_array_value(w)
    }

    fn begin_object<W: ?Sized + Write>(&mut self, w: &mut W) -> io::Result<()> {
        self.0.begin_object(w)
    }

    fn end_object<W: ?Sized + Write>(&mut self, w: &mut W) -> io::Result<()> {
        self.0.end_object(w)
    }

    fn begin_object_key<W: ?Sized + Write>(&mut self, w: &mut W, first: bool) -> io::Result<()> {
        self.0.begin_object_key(w, first)
    }

    fn begin_object_value<W: ?Sized + Write>(&mut self, w: &mut W) -> io::Result<()> {
        self.0.begin_object_value(w)
    }

    fn end_object_value<W: ?Sized + Write>(&mut self, w: &mut W) -> io::Result<()> {
        self.0.end_object_value(w)
    }

    fn write_string_fragment<W: ?Sized + Write>(&mut self, w: &mut W, s: &str) -> io::Result<()> {
        let mut start = 0;
        for (i, c) in s.char_indices() {
            if c.is_ascii() {
                continue;
            }
            w.write_all(s[start..i].as_bytes())?;
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                write!(w, "\\u{:04x}", unit)?;
            }
            start = i + c.len_utf8();
        }
        w.write_all(s[start..].as_bytes())
    }
}

fn sort_keys(v: Value) -> Value {
    match v {
        Value::Object(m) => {
            let mut pairs: Vec<(String, Value)> = m.into_iter().collect();
            pairs.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (k, v) in pairs {
                sorted.insert(k, sort_keys(v));
            }
            Value::Object(sorted)
        }
        Value::Array(a) => Value::Array(a.into_iter().map(sort_keys).collect()),
        other => other,
    }
}
