use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct CronRun {
    pub id: i64,
    pub job_name: String,
    pub status: CronStatus,
    pub started_at: NaiveDateTime,
    pub finished_at: Option<NaiveDateTime>,
    pub summary: Option<serde_json::Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CronStatus {
    Running,
    Succeeded,
    Failed,
}

impl CronStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CronStatus::Running => "running",
            CronStatus::Succeeded => "succeeded",
            CronStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "succeeded" => CronStatus::Succeeded,
            "failed" => CronStatus::Failed,
            _ => CronStatus::Running,
        }
    }
}
