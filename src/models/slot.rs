use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slot {
    pub id: String,
    pub business_id: String,
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub status: SlotStatus,
    pub reserved_until: Option<NaiveDateTime>,
    #[serde(skip_serializing)]
    pub reservation_token: Option<String>,
}

impl Slot {
    /// True once the slot's start is at or before `now`. Times are zero-padded `HH:MM:SS`, so
    /// string order is time order.
    pub fn has_started(&self, now: &NaiveDateTime) -> bool {
        match self.date.cmp(&now.date()) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Greater => false,
            std::cmp::Ordering::Equal => {
                self.start_time.as_str() <= now.time().format("%H:%M:%S").to_string().as_str()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Available,
    Reserved,
    Booked,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Available => "available",
            SlotStatus::Reserved => "reserved",
            SlotStatus::Booked => "booked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(SlotStatus::Available),
            "reserved" => Some(SlotStatus::Reserved),
            "booked" => Some(SlotStatus::Booked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotResponse {
    pub id: String,
    pub business_id: String,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub status: String,
}

impl From<&Slot> for SlotResponse {
    fn from(s: &Slot) -> Self {
        Self {
            id: s.id.clone(),
            business_id: s.business_id.clone(),
            date: s.date.format(crate::db::DATE_FORMAT).to_string(),
            start_time: s.start_time.clone(),
            end_time: s.end_time.clone(),
            status: s.status.as_str().to_string(),
        }
    }
}

/// Result of a successful reservation, handed back to the customer.
#[derive(Debug, Clone, Serialize)]
pub struct Reservation {
    pub slot_id: String,
    pub reservation_token: String,
    pub reserved_until: String,
}
