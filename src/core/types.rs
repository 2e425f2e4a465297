use std::fmt;
use std::time::Duration;
use serde::{Serialize, Deserialize};
use chrono::{DateTime, Utc};
use crate::core::error::{Error, ErrorKind, Result};

/// One versioned source of reference data
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RefStreamDefinition {
    pub pipeline_uuid: String,
    pub pipeline_version: String,
    pub stream_id: u64,
    pub part_index: u64,
}

impl RefStreamDefinition {
    pub fn new(
        pipeline_uuid: impl Into<String>,
        pipeline_version: impl Into<String>,
        stream_id: u64,
    ) -> Self {
        RefStreamDefinition {
            pipeline_uuid: pipeline_uuid.into(),
            pipeline_version: pipeline_version.into(),
            stream_id,
            part_index: 0,
        }
    }

    pub fn with_part_index(mut self, part_index: u64) -> Self {
        self.part_index = part_index;
        self
    }
}

impl fmt::Display for RefStreamDefinition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{} (pipeline {} v{})",
            self.stream_id, self.part_index, self.pipeline_uuid, self.pipeline_version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MapDefinition {
    pub ref_stream_definition: RefStreamDefinition,
    pub map_name: String,
}

impl MapDefinition {
    pub fn new(ref_stream_definition: RefStreamDefinition, map_name: impl Into<String>) -> Self {
        MapDefinition {
            ref_stream_definition,
            map_name: map_name.into(),
        }
    }
}

impl fmt::Display for MapDefinition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} / {}", self.ref_stream_definition, self.map_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessingState {
    LoadInProgress,
    Staged,
    Complete,
    Failed,
    Terminated,
    PurgeInProgress,
    PurgeFailed,
    /// Copied to its feed store, the legacy copy is waiting to be purged
    ReadyForPurge,
}

impl ProcessingState {
    /// States a loader may finish with
    pub const COMPLETION_STATES: [ProcessingState; 3] = [
        ProcessingState::Complete,
        ProcessingState::Failed,
        ProcessingState::Terminated,
    ];

    /// States left behind by a load or purge that never finished
    pub const ABANDONED_STATES: [ProcessingState; 4] = [
        ProcessingState::LoadInProgress,
        ProcessingState::PurgeInProgress,
        ProcessingState::Terminated,
        ProcessingState::ReadyForPurge,
    ];

    pub fn is_abandoned(&self) -> bool {
        Self::ABANDONED_STATES.contains(self)
    }
}

/// Per stream record of load state and access time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefDataProcessingInfo {
    pub create_time: DateTime<Utc>,
    pub last_accessed_time: DateTime<Utc>,
    pub effective_time: DateTime<Utc>,
    pub processing_state: ProcessingState,
}

impl RefDataProcessingInfo {
    pub fn new(
        now: DateTime<Utc>,
        effective_time: DateTime<Utc>,
        processing_state: ProcessingState,
    ) -> Self {
        RefDataProcessingInfo {
            create_time: now,
            last_accessed_time: now,
            effective_time,
            processing_state,
        }
    }

    pub fn with_state(&self, processing_state: ProcessingState) -> Self {
        RefDataProcessingInfo {
            processing_state,
            ..self.clone()
        }
    }

    /// Copy with the access time moved to `now` truncated to `granularity`,
    /// or `None` if the truncated time is unchanged and no write is needed.
    pub fn touched(&self, now: DateTime<Utc>, granularity: Duration) -> Option<Self> {
        let truncated = truncate_time(now, granularity);
        if truncated == self.last_accessed_time {
            None
        } else {
            Some(RefDataProcessingInfo {
                last_accessed_time: truncated,
                ..self.clone()
            })
        }
    }

    pub fn was_accessed_after(&self, threshold: DateTime<Utc>) -> bool {
        self.last_accessed_time > threshold
    }
}

pub fn truncate_time(time: DateTime<Utc>, granularity: Duration) -> DateTime<Utc> {
    let granularity_ms = granularity.as_millis() as i64;
    if granularity_ms <= 1 {
        return time;
    }
    let ms = time.timestamp_millis();
    DateTime::from_timestamp_millis(ms - ms.rem_euclid(granularity_ms)).unwrap_or(time)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ValueType {
    Null = 0,
    String = 1,
    FastInfoset = 2,
}

impl ValueType {
    pub fn id(&self) -> u8 {
        *self as u8
    }

    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0 => Ok(ValueType::Null),
            1 => Ok(ValueType::String),
            2 => Ok(ValueType::FastInfoset),
            _ => Err(Error::new(ErrorKind::Serialization, format!("Unknown value type id {}", id))),
        }
    }
}

/// A reference data value. Null is a marker that is never physically stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RefDataValue {
    String(String),
    FastInfoset(Vec<u8>),
    Null,
}

impl RefDataValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            RefDataValue::String(_) => ValueType::String,
            RefDataValue::FastInfoset(_) => ValueType::FastInfoset,
            RefDataValue::Null => ValueType::Null,
        }
    }

    pub fn payload(&self) -> &[u8] {
        match self {
            RefDataValue::String(s) => s.as_bytes(),
            RefDataValue::FastInfoset(b) => b,
            RefDataValue::Null => &[],
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            RefDataValue::Null => true,
            RefDataValue::String(_) => false,
            RefDataValue::FastInfoset(b) => b.is_empty(),
        }
    }
}

impl From<&str> for RefDataValue {
    fn from(s: &str) -> Self {
        RefDataValue::String(s.to_string())
    }
}

impl From<String> for RefDataValue {
    fn from(s: String) -> Self {
        RefDataValue::String(s)
    }
}

/// Borrowed view of a stored value, valid for the life of the read txn that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypedBytes<'a> {
    pub value_type: ValueType,
    pub bytes: &'a [u8],
}

impl<'a> TypedBytes<'a> {
    pub fn to_value(&self) -> Result<RefDataValue> {
        match self.value_type {
            ValueType::Null => Ok(RefDataValue::Null),
            ValueType::String => {
                let s = std::str::from_utf8(self.bytes).map_err(|e| {
                    Error::new(ErrorKind::Serialization, format!("Invalid UTF-8 value: {}", e))
                })?;
                Ok(RefDataValue::String(s.to_string()))
            }
            ValueType::FastInfoset => Ok(RefDataValue::FastInfoset(self.bytes.to_vec())),
        }
    }
}

/// Half open numeric range `[from, to)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyRange {
    pub from: u64,
    pub to: u64,
}

impl KeyRange {
    pub fn new(from: u64, to: u64) -> Result<Self> {
        if from >= to {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("Range from {} must be less than to {}", from, to),
            ));
        }
        Ok(KeyRange { from, to })
    }

    pub fn contains(&self, value: u64) -> bool {
        value >= self.from && value < self.to
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}", self.from, self.to)
    }
}

/// Result of putting an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOutcome {
    pub success: bool,
    pub is_duplicate: Option<bool>,
}

impl PutOutcome {
    pub fn new_entry() -> Self {
        PutOutcome { success: true, is_duplicate: Some(false) }
    }

    pub fn replaced_entry() -> Self {
        PutOutcome { success: true, is_duplicate: Some(true) }
    }

    /// Key already present and overwrite disabled, nothing written
    pub fn failed() -> Self {
        PutOutcome { success: false, is_duplicate: Some(true) }
    }

    /// Success where duplication is unknown or not applicable
    pub fn success() -> Self {
        PutOutcome { success: true, is_duplicate: None }
    }
}
