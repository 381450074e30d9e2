//! The ten online detector primitives (§4.1).
//!
//! Each detector is a fixed-size, allocation-free (after construction)
//! online estimator. They are held as named fields on `Profile`, not as
//! trait objects — §9 calls for "a compile-time-known aggregate (fixed
//! ten slots) to avoid virtual-call overhead"; adding an eleventh detector
//! is a build-time change, not a registration call.

mod burst;
mod cardinality;
mod cusum;
mod drift;
mod fading_histogram;
mod fingerprint;
mod holt_winters;
mod multiscale;
mod rrcf;
mod spectral;

pub use burst::BurstDetector;
pub use cardinality::CardinalityDetector;
pub use cusum::ChangePointDetector;
pub use drift::DriftDetector;
pub use fading_histogram::FadingHistogramDetector;
pub use fingerprint::FingerprintDetector;
pub use holt_winters::VolumeDetector;
pub use multiscale::MultiScaleDetector;
pub use rrcf::RrcfDetector;
pub use spectral::SpectralDetector;

/// Number of detector slots in the ensemble. §9: "the ensemble scales
/// by increasing D" — this is the one place that would change.
pub const D: usize = 10;

/// Per-event score vector, one entry per detector, indexed by `DetectorId`.
pub type DetectorScores = [f64; D];

/// Stable identifier for each detector slot; used by policy rules
/// (`detector_ids`), `detectors_fired` bitmask construction, and bandit
/// arm indexing, so the numbering here is part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum DetectorId {
    Volume = 0,
    Distribution = 1,
    Cardinality = 2,
    Burst = 3,
    Spectral = 4,
    ChangePoint = 5,
    Drift = 6,
    MultiScale = 7,
    Fingerprint = 8,
    Rrcf = 9,
}

impl DetectorId {
    pub const ALL: [DetectorId; D] = [
        DetectorId::Volume,
        DetectorId::Distribution,
        DetectorId::Cardinality,
        DetectorId::Burst,
        DetectorId::Spectral,
        DetectorId::ChangePoint,
        DetectorId::Drift,
        DetectorId::MultiScale,
        DetectorId::Fingerprint,
        DetectorId::Rrcf,
    ];

    pub fn from_index(idx: usize) -> Option<DetectorId> {
        Self::ALL.get(idx).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for DetectorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DetectorId::Volume => "volume",
            DetectorId::Distribution => "distribution",
            DetectorId::Cardinality => "cardinality",
            DetectorId::Burst => "burst",
            DetectorId::Spectral => "spectral",
            DetectorId::ChangePoint => "change_point",
            DetectorId::Drift => "drift",
            DetectorId::MultiScale => "multiscale",
            DetectorId::Fingerprint => "fingerprint",
            DetectorId::Rrcf => "rrcf",
        };
        f.write_str(name)
    }
}
