//! CSV boundary: template import and received-message export
//!
//! Import reads rows of `topic,payload,qos,retain` into a periodic template
//! list. An optional header row is skipped; malformed rows are skipped and
//! counted instead of failing the whole file. Export writes the message log
//! as `serial,timestamp,topic,payload` in serial order with a fixed
//! `%Y-%m-%d %H:%M:%S` timestamp.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};

use crate::session::{qos_from_u8, OutboundMessage, ReceivedMessage};

/// Timestamp format used in exports, matching the log display format
pub const EXPORT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum CsvError {
    #[error("file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Outcome of an import: the usable templates plus how many rows were dropped
#[derive(Clone, Debug, Default)]
pub struct ImportReport {
    pub templates: Vec<OutboundMessage>,
    pub skipped: usize,
}

/// Reads a periodic template list from CSV
///
/// Row format: `topic,payload,qos,retain` with `qos` in 0..=2 and `retain`
/// one of true/false/1/0 (case-insensitive). A first row whose topic cell is
/// literally `topic` is treated as a header and skipped without counting.
pub fn import_templates<R: Read>(reader: R) -> Result<ImportReport, CsvError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut report = ImportReport::default();
    for (index, record) in csv_reader.records().enumerate() {
        let record = record?;
        if index == 0 && is_header(&record) {
            continue;
        }
        match parse_template(&record) {
            Some(template) => report.templates.push(template),
            None => {
                debug!(row = index + 1, "skipping malformed template row");
                report.skipped += 1;
            }
        }
    }
    info!(
        templates = report.templates.len(),
        skipped = report.skipped,
        "imported periodic template list"
    );
    Ok(report)
}

pub fn import_templates_from_path(path: impl AsRef<Path>) -> Result<ImportReport, CsvError> {
    let file = File::open(path)?;
    import_templates(file)
}

/// Writes the message log to CSV in serial order
///
/// An empty log still produces the header row.
pub fn export_messages<W: Write>(
    writer: W,
    messages: &[ReceivedMessage],
) -> Result<(), CsvError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(["serial", "timestamp", "topic", "payload"])?;
    for message in messages {
        csv_writer.write_record([
            message.serial.to_string(),
            message
                .timestamp
                .format(EXPORT_TIMESTAMP_FORMAT)
                .to_string(),
            message.topic.clone(),
            message.payload_text(),
        ])?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn export_messages_to_path(
    path: impl AsRef<Path>,
    messages: &[ReceivedMessage],
) -> Result<(), CsvError> {
    let file = File::create(path)?;
    export_messages(file, messages)
}

fn is_header(record: &csv::StringRecord) -> bool {
    record
        .get(0)
        .is_some_and(|cell| cell.trim().eq_ignore_ascii_case("topic"))
}

fn parse_template(record: &csv::StringRecord) -> Option<OutboundMessage> {
    let topic = record.get(0)?.trim();
    if topic.is_empty() {
        return None;
    }
    let payload = record.get(1)?;
    let qos_level: u8 = record.get(2)?.trim().parse().ok()?;
    let qos = qos_from_u8(qos_level)?;
    let retain = parse_retain(record.get(3)?.trim())?;

    Some(OutboundMessage {
        topic: topic.to_string(),
        payload: payload.to_string(),
        qos,
        retain,
    })
}

fn parse_retain(cell: &str) -> Option<bool> {
    if cell.eq_ignore_ascii_case("true") || cell == "1" {
        Some(true)
    } else if cell.eq_ignore_ascii_case("false") || cell == "0" {
        Some(false)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::{Local, TimeZone};
    use rumqttc::QoS;

    #[test]
    fn import_skips_malformed_rows_and_counts_them() {
        let data = "topic,payload,qos,retain\n\
                    sensors/a,hello,0,false\n\
                    broken-row,payload,9,maybe\n\
                    sensors/b,world,1,true\n";
        let report = import_templates(data.as_bytes()).unwrap();

        assert_eq!(report.templates.len(), 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.templates[0].topic, "sensors/a");
        assert_eq!(report.templates[1].qos, QoS::AtLeastOnce);
        assert!(report.templates[1].retain);
    }

    #[test]
    fn import_without_header_reads_every_row() {
        let data = "a/b,one,0,0\na/c,two,2,1\n";
        let report = import_templates(data.as_bytes()).unwrap();

        assert_eq!(report.skipped, 0);
        assert_eq!(report.templates.len(), 2);
        assert_eq!(report.templates[1].qos, QoS::ExactlyOnce);
        assert!(report.templates[1].retain);
    }

    #[test]
    fn import_rejects_short_and_empty_topic_rows() {
        let data = "only-three,fields,0\n,empty-topic,0,false\n";
        let report = import_templates(data.as_bytes()).unwrap();
        assert!(report.templates.is_empty());
        assert_eq!(report.skipped, 2);
    }

    #[test]
    fn export_of_empty_log_is_header_only() {
        let mut out = Vec::new();
        export_messages(&mut out, &[]).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "serial,timestamp,topic,payload\n"
        );
    }

    #[test]
    fn export_writes_rows_in_serial_order() {
        let timestamp = Local.with_ymd_and_hms(2026, 8, 29, 12, 30, 0).unwrap();
        let messages = vec![
            ReceivedMessage {
                serial: 1,
                timestamp,
                topic: "a".to_string(),
                payload: Bytes::from_static(b"x"),
            },
            ReceivedMessage {
                serial: 2,
                timestamp,
                topic: "b".to_string(),
                payload: Bytes::from_static(b"y"),
            },
        ];

        let mut out = Vec::new();
        export_messages(&mut out, &messages).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "1,2026-08-29 12:30:00,a,x");
        assert_eq!(lines[2], "2,2026-08-29 12:30:00,b,y");
    }

    #[test]
    fn path_based_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("templates.csv");
        std::fs::write(&path, "t/1,p1,0,false\nt/2,p2,1,true\n").unwrap();

        let report = import_templates_from_path(&path).unwrap();
        assert_eq!(report.templates.len(), 2);
        assert_eq!(report.skipped, 0);
    }
}
