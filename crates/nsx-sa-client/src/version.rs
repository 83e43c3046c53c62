//! Manager version parsing and feature gating.
//!
//! Call sites never compare version numbers themselves. They ask the pool
//! whether a [`Feature`] is supported, which is answered from a
//! [`FeatureSet`] computed once per successful version probe.

use std::fmt;
use std::str::FromStr;

use crate::error::ClientError;

/// A Manager release version, `major.minor.patch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ManagerVersion {
    /// Major release.
    pub major: u32,
    /// Minor release.
    pub minor: u32,
    /// Patch release.
    pub patch: u32,
}

impl ManagerVersion {
    /// Create a version from its components.
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for ManagerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ManagerVersion {
    type Err = ClientError;

    /// Parse a Manager version string such as `4.1.2.0.0.21761691`.
    ///
    /// Only the first three components are significant; missing components
    /// default to zero.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('.');
        let mut next = |required: bool| -> Result<u32, ClientError> {
            match parts.next() {
                Some(p) => p
                    .parse()
                    .map_err(|_| ClientError::InvalidResponse(format!("invalid version {s:?}"))),
                None if required => Err(ClientError::InvalidResponse(format!(
                    "invalid version {s:?}"
                ))),
                None => Ok(0),
            }
        };

        Ok(Self {
            major: next(true)?,
            minor: next(false)?,
            patch: next(false)?,
        })
    }
}

/// Manager capabilities the provisioning engine branches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Principal identity plus cluster control plane provisioning.
    ServiceAccount,
    /// Restoring a realization after a Manager restore.
    ServiceAccountRestore,
    /// In-place certificate rotation of a principal identity.
    ServiceAccountCertRotation,
}

impl Feature {
    /// Every known feature.
    pub const ALL: [Self; 3] = [
        Self::ServiceAccount,
        Self::ServiceAccountRestore,
        Self::ServiceAccountCertRotation,
    ];

    /// The first Manager version supporting this feature.
    #[must_use]
    pub const fn min_version(self) -> ManagerVersion {
        match self {
            Self::ServiceAccount => ManagerVersion::new(4, 0, 1),
            Self::ServiceAccountRestore => ManagerVersion::new(4, 1, 2),
            Self::ServiceAccountCertRotation => ManagerVersion::new(4, 1, 3),
        }
    }

    const fn bit(self) -> u8 {
        match self {
            Self::ServiceAccount => 1,
            Self::ServiceAccountRestore => 1 << 1,
            Self::ServiceAccountCertRotation => 1 << 2,
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ServiceAccount => "ServiceAccount",
            Self::ServiceAccountRestore => "ServiceAccountRestore",
            Self::ServiceAccountCertRotation => "ServiceAccountCertRotation",
        };
        f.write_str(name)
    }
}

/// The set of features a given Manager version supports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureSet(u8);

impl FeatureSet {
    /// An empty set, used while the version is unknown.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every feature.
    #[must_use]
    pub fn all() -> Self {
        Feature::ALL.into_iter().fold(Self::empty(), Self::with)
    }

    /// Derive the feature set of a Manager version.
    #[must_use]
    pub fn from_version(version: ManagerVersion) -> Self {
        Feature::ALL
            .into_iter()
            .filter(|f| version >= f.min_version())
            .fold(Self::empty(), Self::with)
    }

    /// Add a feature.
    #[must_use]
    pub const fn with(self, feature: Feature) -> Self {
        Self(self.0 | feature.bit())
    }

    /// Remove a feature.
    #[must_use]
    pub const fn without(self, feature: Feature) -> Self {
        Self(self.0 & !feature.bit())
    }

    /// Check whether a feature is supported.
    #[must_use]
    pub const fn supports(self, feature: Feature) -> bool {
        self.0 & feature.bit() != 0
    }
}
