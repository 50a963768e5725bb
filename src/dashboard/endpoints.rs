//! The read-only REST endpoints the dashboard consumes.

/// A dashboard API endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
  /// All districts
  Districts,
  /// One district, 404 if unknown
  District { id: u32 },
  /// Latest month's metrics, 404 if none
  Performance { district_id: u32 },
  /// Last 12 months, oldest first
  Trends { district_id: u32 },
  /// District vs state average and top/bottom districts
  Compare { district_id: u32 },
  /// Alerts for a district, newest first
  Alerts { district_id: u32 },
}

impl Endpoint {
  pub fn path(&self) -> String {
    match self {
      Self::Districts => "/api/districts".to_string(),
      Self::District { id } => format!("/api/districts/{}", id),
      Self::Performance { district_id } => format!("/api/districts/{}/performance", district_id),
      Self::Trends { district_id } => format!("/api/districts/{}/trends", district_id),
      Self::Compare { district_id } => format!("/api/districts/{}/compare", district_id),
      Self::Alerts { district_id } => format!("/api/alerts/{}", district_id),
    }
  }

  pub fn description(&self) -> String {
    match self {
      Self::Districts => "all districts".to_string(),
      Self::District { id } => format!("district {}", id),
      Self::Performance { district_id } => format!("performance for district {}", district_id),
      Self::Trends { district_id } => format!("trends for district {}", district_id),
      Self::Compare { district_id } => format!("comparison for district {}", district_id),
      Self::Alerts { district_id } => format!("alerts for district {}", district_id),
    }
  }
}
