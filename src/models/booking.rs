use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub reference: String,
    pub slot_id: String,
    pub business_id: String,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_user_id: Option<String>,
    pub notes: Option<String>,
    pub status: BookingStatus,
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub confirmed_at: Option<NaiveDateTime>,
    pub cancelled_at: Option<NaiveDateTime>,
    pub cancellation_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Rejected,
    Cancelled,
    Expired,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BookingStatus::Pending),
            "confirmed" => Some(BookingStatus::Confirmed),
            "rejected" => Some(BookingStatus::Rejected),
            "cancelled" => Some(BookingStatus::Cancelled),
            "expired" => Some(BookingStatus::Expired),
            _ => None,
        }
    }

    /// `confirmed` is not terminal: it can still be cancelled or marked no-show.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Rejected | BookingStatus::Cancelled | BookingStatus::Expired
        )
    }
}

pub const NO_SHOW_REASON: &str = "no_show";

/// Who triggered a booking transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    Admin,
    Owner { business_id: String },
    Customer { phone: String },
    System { source: String },
}

impl Actor {
    pub fn label(&self) -> String {
        match self {
            Actor::Admin => "admin".to_string(),
            Actor::Owner { business_id } => format!("owner:{business_id}"),
            Actor::Customer { .. } => "customer".to_string(),
            Actor::System { source } => format!("system:{source}"),
        }
    }

    pub fn manages(&self, business_id: &str) -> bool {
        match self {
            Actor::Admin => true,
            Actor::Owner { business_id: own } => own == business_id,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewBooking {
    pub slot_id: String,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_user_id: Option<String>,
    pub notes: Option<String>,
    pub reservation_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BookingResponse {
    pub id: String,
    pub reference: String,
    pub slot_id: String,
    pub business_id: String,
    pub customer_name: String,
    pub status: String,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub created_at: String,
    pub confirmed_at: Option<String>,
    pub cancelled_at: Option<String>,
    pub cancellation_reason: Option<String>,
}

impl From<&Booking> for BookingResponse {
    fn from(b: &Booking) -> Self {
        let ts = |dt: &NaiveDateTime| dt.format(crate::db::TIMESTAMP_FORMAT).to_string();
        Self {
            id: b.id.clone(),
            reference: b.reference.clone(),
            slot_id: b.slot_id.clone(),
            business_id: b.business_id.clone(),
            customer_name: b.customer_name.clone(),
            status: b.status.as_str().to_string(),
            date: b.date.format(crate::db::DATE_FORMAT).to_string(),
            start_time: b.start_time.clone(),
            end_time: b.end_time.clone(),
            created_at: ts(&b.created_at),
            confirmed_at: b.confirmed_at.as_ref().map(ts),
            cancelled_at: b.cancelled_at.as_ref().map(ts),
            cancellation_reason: b.cancellation_reason.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!BookingStatus::Pending.is_terminal());
        assert!(!BookingStatus::Confirmed.is_terminal());
        assert!(BookingStatus::Rejected.is_terminal());
        assert!(BookingStatus::Cancelled.is_terminal());
        assert!(BookingStatus::Expired.is_terminal());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(BookingStatus::parse("expired"), Some(BookingStatus::Expired));
        assert_eq!(BookingStatus::parse("no_show"), None);
    }

    #[test]
    fn test_actor_manages() {
        let owner = Actor::Owner {
            business_id: "biz-1".to_string(),
        };
        assert!(owner.manages("biz-1"));
        assert!(!owner.manages("biz-2"));
        assert!(Actor::Admin.manages("biz-2"));
        assert!(!Actor::Customer {
            phone: "+15550001111".to_string()
        }
        .manages("biz-1"));
    }
}
