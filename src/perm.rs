// CLASSIFICATION: COMMUNITY
// Filename: perm.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-08-24

//! Two-bit permission domain shared by the content store and sessions.
//!
//! The wire protocol encodes a permission set as a single digit:
//! `0` none, `1` write, `2` read, `3` read-write. The two bits are
//! independent levels, not a linear scale; write-only never implies read.

use bitflags::bitflags;

bitflags! {
    /// Access bits granted on a file record or through a descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Perm: u8 {
        /// Content may be overwritten.
        const WRITE = 0b01;
        /// Content may be fetched.
        const READ = 0b10;
    }
}

impl Perm {
    /// Decode a wire digit into a permission set.
    pub fn from_digit(d: char) -> Option<Self> {
        match d {
            '0' => Some(Perm::empty()),
            '1' => Some(Perm::WRITE),
            '2' => Some(Perm::READ),
            '3' => Some(Perm::READ | Perm::WRITE),
            _ => None,
        }
    }

    /// Encode back into the wire digit.
    pub fn as_digit(self) -> char {
        match (self.contains(Perm::READ), self.contains(Perm::WRITE)) {
            (false, false) => '0',
            (false, true) => '1',
            (true, false) => '2',
            (true, true) => '3',
        }
    }

    /// True when every bit in `requested` is granted by `self`.
    pub fn grants(self, requested: Perm) -> bool {
        self.contains(requested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digits_round_trip() {
        for d in ['0', '1', '2', '3'] {
            let p = Perm::from_digit(d).expect("valid digit");
            assert_eq!(p.as_digit(), d);
        }
        assert_eq!(Perm::from_digit('4'), None);
        assert_eq!(Perm::from_digit('x'), None);
    }

    #[test]
    fn write_only_and_read_only_stay_distinct() {
        let read = Perm::READ;
        let write = Perm::WRITE;
        assert!(!read.grants(write));
        assert!(!write.grants(read));
        assert!((read | write).grants(write));
        assert!(read.grants(Perm::empty()));
        assert!(!Perm::empty().grants(read));
    }
}
