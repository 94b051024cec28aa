// FormatSelector - quality tier to yt-dlp format fallback chain
//
// YouTube SABR streaming blocks many formats on some clients, so a request
// never asks for a single format. It walks a capability-ordered table from the
// requested tier down to "worst", which is always available.
// 60fps variants come first within each resolution.

use super::models::{FormatDescriptor, QualityTier};

/// Every format we know how to ask for, most capable first
pub static FORMAT_TABLE: [FormatDescriptor; 9] = [
    FormatDescriptor {
        label: "4K60",
        selector: "bv*[height>=2160][fps>=50]+ba/b",
    },
    FormatDescriptor {
        label: "4K",
        selector: "bv*[height>=2160]+ba/b",
    },
    FormatDescriptor {
        label: "1080p60",
        selector: "bv*[height<=1080][fps>=50]+ba/b[height<=1080]/b",
    },
    FormatDescriptor {
        label: "1080p",
        selector: "bv*[height<=1080]+ba/b[height<=1080]/b",
    },
    FormatDescriptor {
        label: "720p60",
        selector: "bv*[height<=720][fps>=50]+ba/b[height<=720]/b",
    },
    FormatDescriptor {
        label: "720p",
        selector: "bv*[height<=720]+ba/b[height<=720]/b",
    },
    FormatDescriptor {
        label: "480p",
        selector: "bv*[height<=480]+ba/b[height<=480]/b",
    },
    FormatDescriptor {
        label: "360p",
        selector: "bv*[height<=360]+ba/b[height<=360]/b",
    },
    FormatDescriptor {
        label: "worst",
        selector: "worst",
    },
];

pub struct FormatSelector;

impl FormatSelector {
    /// Index into `FORMAT_TABLE` where a tier starts
    pub fn start_index(quality: QualityTier) -> usize {
        match quality {
            QualityTier::Max => 0,
            QualityTier::P1080 => 2,
            QualityTier::P720 => 4,
            QualityTier::P360 => 7,
        }
    }

    /// Formats to try, in order, for a requested tier
    pub fn select_formats(quality: QualityTier) -> &'static [FormatDescriptor] {
        &FORMAT_TABLE[Self::start_index(quality)..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_starts_at_top() {
        let formats = FormatSelector::select_formats(QualityTier::Max);
        assert_eq!(formats.len(), FORMAT_TABLE.len());
        assert_eq!(formats[0].label, "4K60");
    }

    #[test]
    fn test_720_chain() {
        let labels: Vec<&str> = FormatSelector::select_formats(QualityTier::P720)
            .iter()
            .map(|f| f.label)
            .collect();
        assert_eq!(labels, vec!["720p60", "720p", "480p", "360p", "worst"]);
    }

    #[test]
    fn test_every_tier_ends_at_baseline() {
        for tier in QualityTier::ALL {
            let formats = FormatSelector::select_formats(tier);
            assert!(!formats.is_empty());
            assert_eq!(formats.last().unwrap().selector, "worst");
        }
    }

    #[test]
    fn test_chains_are_nested_suffixes() {
        let max = FormatSelector::select_formats(QualityTier::Max);
        let p1080 = FormatSelector::select_formats(QualityTier::P1080);
        let p360 = FormatSelector::select_formats(QualityTier::P360);
        assert!(max.ends_with(p1080));
        assert!(p1080.ends_with(p360));
        assert_eq!(p360[0].label, "360p");
    }
}
