//! Byte-exact comparison of two variants.
//!
//! Plain equality: any differing byte, including an embedded build
//! timestamp, counts as a difference.

use crate::package::{EntryRole, PackageContents};

/// Whether both variants ship the same license bytes.
pub fn licenses_equal(a: &PackageContents, b: &PackageContents) -> bool {
    a.license == b.license
}

/// Whether both variants ship the same managed library bytes.
pub fn managed_libraries_equal(a: &PackageContents, b: &PackageContents) -> bool {
    a.managed_library == b.managed_library
}

/// Where two blobs first diverge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Difference {
    /// Offset of the first differing byte, or the shorter length when one
    /// blob is a prefix of the other.
    pub offset: usize,
    pub left_len: usize,
    pub right_len: usize,
}

impl std::fmt::Display for Difference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "first difference at offset {:#x} ({} vs {} bytes)",
            self.offset, self.left_len, self.right_len
        )
    }
}

/// `None` when the blobs for `role` are identical.
pub fn describe_difference(
    a: &PackageContents,
    b: &PackageContents,
    role: EntryRole,
) -> Option<Difference> {
    let (left, right) = (a.get(role), b.get(role));
    if left == right {
        return None;
    }
    let offset = left
        .iter()
        .zip(right)
        .position(|(l, r)| l != r)
        .unwrap_or_else(|| left.len().min(right.len()));
    Some(Difference {
        offset,
        left_len: left.len(),
        right_len: right.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtmerge_schema::RuntimeId;

    fn contents(rid: &str, license: &[u8], managed: &[u8]) -> PackageContents {
        PackageContents {
            runtime: RuntimeId::new(rid).unwrap(),
            license: license.to_vec(),
            managed_library: managed.to_vec(),
            native_library: rid.as_bytes().to_vec(),
        }
    }

    #[test]
    fn equality_is_reflexive_and_symmetric() {
        let samples = [
            contents("a1", &[1, 2, 3], b"M"),
            contents("a2", &[1, 2, 3], b"M"),
            contents("a3", &[1, 2, 4], b"N"),
            contents("a4", &[1, 2], b"MM"),
            contents("a5", &[], b""),
        ];

        for a in &samples {
            assert!(licenses_equal(a, a));
            assert!(managed_libraries_equal(a, a));
            for b in &samples {
                assert_eq!(licenses_equal(a, b), licenses_equal(b, a));
                assert_eq!(managed_libraries_equal(a, b), managed_libraries_equal(b, a));
            }
        }
    }

    #[test]
    fn native_library_is_not_compared() {
        let a = contents("a1", b"L", b"M");
        let b = contents("a2", b"L", b"M");
        assert_ne!(a.native_library, b.native_library);
        assert!(licenses_equal(&a, &b));
        assert!(managed_libraries_equal(&a, &b));
    }

    #[test]
    fn single_byte_difference_is_detected() {
        let a = contents("a1", &[1, 2, 3], b"M");
        let b = contents("a2", &[1, 2, 9], b"M");
        assert!(!licenses_equal(&a, &b));
        assert_eq!(
            describe_difference(&a, &b, EntryRole::License),
            Some(Difference {
                offset: 2,
                left_len: 3,
                right_len: 3
            })
        );
        assert_eq!(describe_difference(&a, &b, EntryRole::ManagedLibrary), None);
    }

    #[test]
    fn prefix_difference_points_at_shorter_length() {
        let a = contents("a1", b"L", b"MANAGED");
        let b = contents("a2", b"L", b"MANA");
        let diff = describe_difference(&a, &b, EntryRole::ManagedLibrary).unwrap();
        assert_eq!(diff.offset, 4);
        assert_eq!(diff.to_string(), "first difference at offset 0x4 (7 vs 4 bytes)");
    }
}
