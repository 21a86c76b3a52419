use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};

/// Client platform that produced a metric.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::Ios, Platform::Android];
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Ios => write!(f, "ios"),
            Platform::Android => write!(f, "android"),
        }
    }
}

/// The metrics the aggregation engine knows about.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
pub enum MetricKind {
    /// Bucket 0: code verified without a recent notification,
    /// bucket 1: code verified with one.
    CodeVerified,
    /// Same bucket layout as `CodeVerified`, for uploaded keys.
    KeysUploaded,
    /// One bucket per classification category.
    NotificationShown,
    /// One bucket per classification category.
    NotificationInteraction,
    /// Category `c`, delay range `r` at index `c * DELAY_RANGES + r`.
    DateExposure,
    /// Verified a code after a notification of category `i`.
    SecondaryAttack,
    /// Reference metric for the iOS scale correction.
    UserRisk,
}

/// Number of coarse exposure-delay ranges per category in `DateExposure`.
pub const DELAY_RANGES: usize = 4;

impl MetricKind {
    pub const ALL: [MetricKind; 7] = [
        MetricKind::CodeVerified,
        MetricKind::KeysUploaded,
        MetricKind::NotificationShown,
        MetricKind::NotificationInteraction,
        MetricKind::DateExposure,
        MetricKind::SecondaryAttack,
        MetricKind::UserRisk,
    ];

    /// Platform-independent identifier, shared by both platforms.
    pub fn generic_id(&self) -> &'static str {
        match self {
            MetricKind::CodeVerified => "CodeVerified",
            MetricKind::KeysUploaded => "KeysUploaded",
            MetricKind::NotificationShown => "PeriodicExposureNotification",
            MetricKind::NotificationInteraction => {
                "PeriodicExposureNotificationInteraction"
            }
            MetricKind::DateExposure => "DateExposure",
            MetricKind::SecondaryAttack => "SecondaryAttack",
            MetricKind::UserRisk => "UserRisk",
        }
    }

    /// Short name used for output columns.
    pub fn column_prefix(&self) -> &'static str {
        match self {
            MetricKind::CodeVerified => "verified",
            MetricKind::KeysUploaded => "keys",
            MetricKind::NotificationShown => "notifications",
            MetricKind::NotificationInteraction => "interactions",
            MetricKind::DateExposure => "exposure",
            MetricKind::SecondaryAttack => "secondary_attack",
            MetricKind::UserRisk => "user_risk",
        }
    }

    /// Expected bucket width for `num_categories` classification categories.
    /// `None` means any width is accepted.
    pub fn bucket_width(&self, num_categories: usize) -> Option<usize> {
        match self {
            MetricKind::CodeVerified | MetricKind::KeysUploaded => Some(2),
            MetricKind::NotificationShown
            | MetricKind::NotificationInteraction
            | MetricKind::SecondaryAttack => Some(num_categories),
            MetricKind::DateExposure => Some(num_categories * DELAY_RANGES),
            MetricKind::UserRisk => None,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.generic_id())
    }
}

/// Maps `{platform, kind}` to the concrete metric id reported by that
/// platform, and back.
#[derive(Debug, Clone)]
pub struct MetricTable {
    ids: HashMap<(Platform, MetricKind), String>,
    by_id: HashMap<String, (Platform, MetricKind)>,
}

impl MetricTable {
    pub fn new() -> Self {
        Self {
            ids: HashMap::new(),
            by_id: HashMap::new(),
        }
    }

    /// Canonical table: iOS ids are prefixed with `com.apple.EN.`, Android
    /// uses the generic ids. Android has no `UserRisk` metric.
    pub fn standard() -> Self {
        let mut table = Self::new();
        for kind in MetricKind::ALL {
            table.insert(
                Platform::Ios,
                kind,
                format!("com.apple.EN.{}", kind.generic_id()),
            );
            if kind != MetricKind::UserRisk {
                table.insert(Platform::Android, kind, kind.generic_id());
            }
        }
        table
    }

    pub fn insert(
        &mut self,
        platform: Platform,
        kind: MetricKind,
        id: impl Into<String>,
    ) {
        let id = id.into();
        if let Some(old) = self.ids.insert((platform, kind), id.clone()) {
            self.by_id.remove(&old);
        }
        self.by_id.insert(id, (platform, kind));
    }

    pub fn id(&self, platform: Platform, kind: MetricKind) -> Option<&str> {
        self.ids.get(&(platform, kind)).map(String::as_str)
    }

    pub fn resolve(&self, metric_id: &str) -> Option<(Platform, MetricKind)> {
        self.by_id.get(metric_id).copied()
    }
}

impl Default for MetricTable {
    fn default() -> Self {
        Self::standard()
    }
}
