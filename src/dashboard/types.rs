use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An administrative district of Maharashtra.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct District {
  pub id: u32,
  pub name: String,
  pub name_marathi: String,
  pub code: String,
  /// Decimal columns arrive as strings
  pub latitude: Option<String>,
  pub longitude: Option<String>,
}

/// One district's aggregated metrics for one month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyPerformance {
  pub id: u32,
  pub district_id: u32,
  /// `YYYY-MM`
  pub month: String,
  pub workers_employed: i64,
  pub person_days_generated: i64,
  pub wages_paid: String,
  pub assets_created: i64,
  pub work_completion_rate: String,
  pub active_job_cards: i64,
  pub average_wage_days: Option<i64>,
  pub updated_at: DateTime<Utc>,
}

/// State-wide averages for a month. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StateAverage {
  pub workers_employed: Option<i64>,
  pub person_days_generated: Option<i64>,
  pub wages_paid: Option<String>,
  pub assets_created: Option<i64>,
  pub work_completion_rate: Option<String>,
  pub active_job_cards: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedDistrict {
  pub district: District,
  pub performance: MonthlyPerformance,
}

/// A district against the state average and the top/bottom three districts
/// by workers employed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonData {
  pub district: District,
  pub performance: MonthlyPerformance,
  pub state_average: StateAverage,
  pub top_districts: Vec<RankedDistrict>,
  pub bottom_districts: Vec<RankedDistrict>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
  pub id: u32,
  pub district_id: u32,
  #[serde(rename = "type")]
  pub alert_type: String,
  pub severity: String,
  pub title: String,
  pub title_marathi: String,
  pub description: String,
  pub description_marathi: String,
  pub affected_metric: Option<String>,
  pub value: Option<String>,
  pub created_at: DateTime<Utc>,
  pub is_active: i32,
}

/// Error body the API sends with non-200 statuses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
  pub error: String,
}
