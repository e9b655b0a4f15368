//! GTID (Global Transaction ID) 집합 처리
//!
//! GTID 형식: UUID:sequence-number
//! 여러 서버의 GTID 집합: "uuid1:1-100:200,uuid2:1-50"
//!
//! COM_BINLOG_DUMP_GTID 에 실을 바이너리 인코딩도 여기서 만듭니다.

use crate::error::{BinlogError, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use bytes::Bytes;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::sync::OnceLock;
use uuid::Uuid;

/// 인코딩된 GTID 집합
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedGtidSet {
    pub length: u32,
    pub bytes: Bytes,
}

/// GTID 문자열 인코더
pub trait GtidEncoder: Send + Sync {
    fn encode(&self, gtid: &str) -> Result<EncodedGtidSet>;
}

/// MySQL Gtid_set 바이너리 형식 인코더
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlGtidEncoder;

impl GtidEncoder for MySqlGtidEncoder {
    fn encode(&self, gtid: &str) -> Result<EncodedGtidSet> {
        let bytes = GtidSet::parse(gtid)?.encode()?;
        Ok(EncodedGtidSet {
            length: bytes.len() as u32,
            bytes,
        })
    }
}

/// GTID 범위 (양 끝 포함)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GtidRange {
    pub start: u64,
    pub end: u64,
}

impl GtidRange {
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start == 0 || start > end {
            return Err(BinlogError::Gtid(format!("Invalid range: {}-{}", start, end)));
        }
        Ok(GtidRange { start, end })
    }

    pub fn contains(&self, value: u64) -> bool {
        value >= self.start && value <= self.end
    }

    /// 겹치거나 연접한 범위 병합
    fn merge(&self, other: &GtidRange) -> Option<GtidRange> {
        if self.end.saturating_add(1) >= other.start && other.end.saturating_add(1) >= self.start {
            Some(GtidRange {
                start: self.start.min(other.start),
                end: self.end.max(other.end),
            })
        } else {
            None
        }
    }
}

impl fmt::Display for GtidRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// 전체 GTID 집합 (UUID -> 정렬된 범위들)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GtidSet {
    pub sets: BTreeMap<Uuid, Vec<GtidRange>>,
}

fn range_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d+)(?:-(\d+))?$").expect("valid GTID range pattern"))
}

impl GtidSet {
    pub fn new() -> Self {
        GtidSet::default()
    }

    /// GTID 문자열 파싱 (format: "uuid1:1-100:200,uuid2:1-50")
    pub fn parse(gtid_str: &str) -> Result<Self> {
        let mut gtid_set = GtidSet::new();

        for part in gtid_str.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let mut pieces = part.split(':');
            let uuid_str = pieces.next().unwrap_or_default().trim();
            let uuid = Uuid::parse_str(uuid_str)
                .map_err(|e| BinlogError::Gtid(format!("Invalid UUID '{}': {}", uuid_str, e)))?;

            let mut has_range = false;
            for range_str in pieces {
                let range = parse_range(range_str.trim())?;
                gtid_set.add_range(uuid, range);
                has_range = true;
            }

            if !has_range {
                return Err(BinlogError::Gtid(format!("No intervals for {}", uuid)));
            }
        }

        Ok(gtid_set)
    }

    pub fn add_range(&mut self, uuid: Uuid, range: GtidRange) {
        let ranges = self.sets.entry(uuid).or_default();
        ranges.push(range);
        ranges.sort();

        let mut merged: Vec<GtidRange> = Vec::with_capacity(ranges.len());
        for range in ranges.drain(..) {
            match merged.last_mut() {
                Some(last) => match last.merge(&range) {
                    Some(joined) => *last = joined,
                    None => merged.push(range),
                },
                None => merged.push(range),
            }
        }
        *ranges = merged;
    }

    pub fn contains(&self, uuid: &Uuid, sequence: u64) -> bool {
        self.sets
            .get(uuid)
            .map(|ranges| ranges.iter().any(|r| r.contains(sequence)))
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.sets.values().all(|ranges| ranges.is_empty())
    }

    /// 바이너리 인코딩
    ///
    /// `[n_sids u64][sid 16 bytes][n_intervals u64][(start u64, end + 1 u64)...]...`
    pub fn encode(&self) -> Result<Bytes> {
        let mut buffer = Vec::new();

        buffer.write_u64::<LittleEndian>(self.sets.len() as u64)?;
        for (uuid, ranges) in &self.sets {
            buffer.write_all(uuid.as_bytes())?;
            buffer.write_u64::<LittleEndian>(ranges.len() as u64)?;
            for range in ranges {
                // 끝은 exclusive
                let end = range.end.checked_add(1).ok_or_else(|| {
                    BinlogError::Gtid(format!("Interval end out of range: {}:{}", uuid, range))
                })?;
                buffer.write_u64::<LittleEndian>(range.start)?;
                buffer.write_u64::<LittleEndian>(end)?;
            }
        }

        Ok(Bytes::from(buffer))
    }
}

impl fmt::Display for GtidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .sets
            .iter()
            .filter(|(_, ranges)| !ranges.is_empty())
            .map(|(uuid, ranges)| {
                let ranges: Vec<String> = ranges.iter().map(|r| r.to_string()).collect();
                format!("{}:{}", uuid, ranges.join(":"))
            })
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

fn parse_range(range_str: &str) -> Result<GtidRange> {
    let captures = range_pattern()
        .captures(range_str)
        .ok_or_else(|| BinlogError::Gtid(format!("Invalid interval: {}", range_str)))?;

    let parse = |s: &str| {
        s.parse::<u64>()
            .map_err(|_| BinlogError::Gtid(format!("Invalid interval: {}", range_str)))
    };

    let start = parse(&captures[1])?;
    let end = match captures.get(2) {
        Some(end) => parse(end.as_str())?,
        None => start,
    };
    GtidRange::new(start, end)
}
