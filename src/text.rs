//! Line formats for bulk import/export, replica merge and the debug dump.
//!
//! ```text
//! import/export   <key>:<ts>|<amount>[,<ts>|<amount>...]
//! wire            <storeType>:<storeName>:<key>:<item>[,<item>...]
//!                 where <item> is <ts>|<amount> or <ts> (amount 1)
//! dump entry      <key>=<date>|<amount>[;<date>|<amount>...]
//! ```

use crate::error::{Error, Result};
use crate::record::{Record, Slot, REAL_TIMESTAMP_FLOOR};
use crate::time::format_minute;

fn parse_num<T: std::str::FromStr>(what: &'static str, s: &str) -> Result<T> {
    s.trim().parse().map_err(|_| Error::parse(what, s))
}

fn parse_slot(item: &str) -> Result<Slot> {
    match item.split_once('|') {
        Some((ts, amount)) => Ok(Slot::new(
            parse_num("timestamp", ts)?,
            parse_num("amount", amount)?,
        )),
        None => Ok(Slot::new(parse_num("timestamp", item)?, 1)),
    }
}

/// Parse `ts|amount[,ts|amount...]`, where a bare `ts` means amount 1. Slots
/// keep the order given.
pub fn parse_items(items: &str) -> Result<Record> {
    let slots = items
        .split(',')
        .map(parse_slot)
        .collect::<Result<Vec<_>>>()?;
    Record::from_slots(slots).ok_or_else(|| Error::parse("items", items))
}

/// Parse one `key:items` import line.
pub fn parse_import_line(line: &str) -> Result<(u64, Record)> {
    let (key, items) = line
        .trim()
        .split_once(':')
        .ok_or_else(|| Error::parse("import line", line))?;
    Ok((parse_num("key", key)?, parse_items(items)?))
}

pub fn format_import_line(key: u64, record: &Record) -> String {
    format!("{key}:{record}")
}

/// A record shipped from another replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireLine<'a> {
    /// Backend kind of the destination store.
    pub kind: &'a str,
    /// Destination store name.
    pub name: &'a str,
    pub key: u64,
    pub record: Record,
}

impl<'a> WireLine<'a> {
    pub fn parse(line: &'a str) -> Result<Self> {
        let mut parts = line.trim().splitn(4, ':');
        let (Some(kind), Some(name), Some(key), Some(items)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::parse("wire line", line));
        };
        if kind.is_empty() || name.is_empty() {
            return Err(Error::parse("wire line", line));
        }

        Ok(Self {
            kind,
            name,
            key: parse_num("key", key)?,
            record: parse_items(items)?,
        })
    }
}

impl std::fmt::Display for WireLine<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}:{}", self.kind, self.name, self.key, self.record)
    }
}

/// `key=date|amount;date|amount`. Legacy counters below the real-timestamp
/// floor print their raw minute value.
pub fn dump_entry(key: u64, record: &Record) -> String {
    let slots: Vec<String> = record
        .slots()
        .iter()
        .map(|slot| {
            let when = if slot.expiry > REAL_TIMESTAMP_FLOOR {
                format_minute(slot.expiry)
            } else {
                slot.expiry.to_string()
            };
            format!("{when}|{}", slot.amount)
        })
        .collect();
    format!("{key}={}", slots.join(";"))
}
