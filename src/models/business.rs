use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Business {
    pub id: String,
    pub name: String,
    pub opening_time: String,
    pub closing_time: String,
    pub slot_duration_minutes: i64,
    pub owner_whatsapp: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewBusiness {
    pub name: String,
    pub opening_time: String,
    pub closing_time: String,
    pub slot_duration_minutes: i64,
    pub owner_whatsapp: Option<String>,
}

/// A closed period on a date. No start/end means the whole day is closed (holiday).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Closure {
    pub business_id: String,
    pub date: NaiveDate,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub reason: Option<String>,
}

impl Closure {
    pub fn is_full_day(&self) -> bool {
        self.start_time.is_none() || self.end_time.is_none()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewClosure {
    pub date: NaiveDate,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub reason: Option<String>,
}
