/*
 * Section partitioning.
 *
 * Splits the segment space between cooperating processes. Section `i`
 * of `n` owns every segment `s` with `s % n == i`, so each process gets
 * an even spread of segment ids rather than a contiguous run.
 */

use copy_common::{CopyError, Result};
use serde::{Deserialize, Serialize};

use crate::capacity::SegmentPlan;

/// This process's slice of the segment space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionSpec {
    pub index: u32,
    pub total_sections: u32,
}

impl SectionSpec {
    /// The whole table in one process.
    pub fn whole() -> Self {
        Self {
            index: 0,
            total_sections: 1,
        }
    }

    /// Segment ids owned by this section, ascending.
    pub fn owned_segments(&self, plan: &SegmentPlan) -> impl Iterator<Item = u32> {
        (self.index..plan.total_segments).step_by(self.total_sections.max(1) as usize)
    }

    /// Returns true if `segment` belongs to this section.
    pub fn owns(&self, segment: u32) -> bool {
        segment % self.total_sections.max(1) == self.index
    }
}

/// Validates a requested section against the segment count.
///
/// Succeeds iff `0 <= index < total_sections <= total_segments`.
pub fn validate_section(index: i64, total_sections: i64, total_segments: u32) -> Result<SectionSpec> {
    let out_of_range = || CopyError::SectionOutOfRange {
        index,
        total_sections,
        total_segments,
    };

    if index < 0 || index >= total_sections || total_sections > i64::from(total_segments) {
        return Err(out_of_range());
    }

    Ok(SectionSpec {
        index: u32::try_from(index).map_err(|_| out_of_range())?,
        total_sections: u32::try_from(total_sections).map_err(|_| out_of_range())?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::SegmentSource;

    fn plan(total_segments: u32) -> SegmentPlan {
        SegmentPlan {
            total_segments,
            source: SegmentSource::Capacity,
        }
    }

    #[test]
    fn test_modulo_ownership() {
        let section = validate_section(2, 3, 10).unwrap();
        let owned: Vec<u32> = section.owned_segments(&plan(10)).collect();
        assert_eq!(owned, vec![2, 5, 8]);
        assert!(section.owns(5));
        assert!(!section.owns(6));
    }

    #[test]
    fn test_single_section_owns_everything() {
        let owned: Vec<u32> = SectionSpec::whole().owned_segments(&plan(4)).collect();
        assert_eq!(owned, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_rejects_out_of_range() {
        for (index, total, segments) in [(-1, 3, 10), (3, 3, 10), (5, 3, 10), (0, 11, 10), (0, 0, 10)] {
            let err = validate_section(index, total, segments).unwrap_err();
            assert!(
                matches!(err, CopyError::SectionOutOfRange { .. }),
                "({index}, {total}, {segments}) should be rejected"
            );
        }
    }

    #[test]
    fn test_validation_matches_predicate() {
        for segments in 1..=6u32 {
            for total in -1..=8i64 {
                for index in -2..=8i64 {
                    let expected = 0 <= index && index < total && total <= i64::from(segments);
                    assert_eq!(
                        validate_section(index, total, segments).is_ok(),
                        expected,
                        "index={index} total={total} segments={segments}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_sections_partition_segments() {
        let plan = plan(10);
        let mut seen = vec![0u32; 10];
        for index in 0..4 {
            let section = validate_section(index, 4, 10).unwrap();
            for s in section.owned_segments(&plan) {
                seen[s as usize] += 1;
            }
        }
        assert!(seen.iter().all(|&count| count == 1));
    }
}
