//! Command Identifier encoding (§3, §9 redesign note).
//!
//! The wire CID is a raw `u16` chosen by the host and echoed back in the
//! CQE. Historically this was a flag-bit `u16` passed around raw; here it is
//! a sum type that only touches its bit layout at `encode`/`decode`, at the
//! MMIO boundary.

/// Base value of the admin Get-Log-Page CID range; the range
/// `[ADMIN_CID_GET_LOG_PAGE, ADMIN_CID_GET_LOG_PAGE + SG_LIST_PAGES)` is
/// reserved and never reused by `AdminInit`.
pub const ADMIN_CID_GET_LOG_PAGE: u16 = 0x10;

/// Sentinel CID for the Delete I/O SQ step of the shutdown state machine.
pub const SHUTDOWN_DELETE_SQ: u16 = 0xFFFE;
/// Sentinel CID for the Delete I/O CQ step of the shutdown state machine.
pub const SHUTDOWN_DELETE_CQ: u16 = 0xFFFD;

const NON_TAGGED_FLAG: u16 = 1 << 15;
const ORDERED_FLUSH_FLAG: u16 = 1 << 14;
const VALUE_MASK: u16 = 0x3FFF;

/// Which ring a CID is being encoded/decoded against. Admin-queue CIDs and
/// IO-queue CIDs share no numeric collisions because the two CQs are
/// disjoint rings; decoding still needs to know which ring produced the raw
/// value to pick the right variant family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queue {
    Admin,
    Io,
}

/// A decoded Command Identifier. See module docs and §3/§9 of the design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cid {
    /// SCSI tagged queue tag, carried directly as the CID value.
    Tagged(u16),
    /// Rolling 14-bit untagged sequence number.
    Untagged(u16),
    /// Synthetic fence flush preceding an ORDERED tagged I/O; value is the
    /// tag of the I/O it fences. Resolves no host request on completion.
    OrderedFlush(u16),
    /// One of the five fixed init-state-machine admin steps.
    AdminInit(u8),
    /// Admin Get Log Page completion, carrying the PRP pool index used for
    /// the scratch buffer.
    AdminGetLog(u8),
    /// Delete I/O SQ shutdown step.
    ShutdownDeleteSq,
    /// Delete I/O CQ shutdown step.
    ShutdownDeleteCq,
}

impl Cid {
    /// Encode to the raw wire value written into a command's CDW0.
    pub fn encode(self) -> u16 {
        match self {
            Cid::Tagged(v) => v & VALUE_MASK,
            Cid::Untagged(v) => NON_TAGGED_FLAG | (v & VALUE_MASK),
            Cid::OrderedFlush(v) => ORDERED_FLUSH_FLAG | (v & VALUE_MASK),
            Cid::AdminInit(step) => step as u16,
            Cid::AdminGetLog(idx) => NON_TAGGED_FLAG | (ADMIN_CID_GET_LOG_PAGE + idx as u16),
            Cid::ShutdownDeleteSq => SHUTDOWN_DELETE_SQ,
            Cid::ShutdownDeleteCq => SHUTDOWN_DELETE_CQ,
        }
    }

    /// Decode a raw CQE CID, given which ring produced it.
    pub fn decode(raw: u16, queue: Queue) -> Cid {
        if raw == SHUTDOWN_DELETE_SQ {
            return Cid::ShutdownDeleteSq;
        }
        if raw == SHUTDOWN_DELETE_CQ {
            return Cid::ShutdownDeleteCq;
        }
        match queue {
            Queue::Admin => {
                if raw & NON_TAGGED_FLAG != 0 {
                    let value = raw & VALUE_MASK;
                    Cid::AdminGetLog(value.saturating_sub(ADMIN_CID_GET_LOG_PAGE) as u8)
                } else {
                    Cid::AdminInit(raw as u8)
                }
            }
            Queue::Io => {
                if raw & NON_TAGGED_FLAG != 0 {
                    Cid::Untagged(raw & VALUE_MASK)
                } else if raw & ORDERED_FLUSH_FLAG != 0 {
                    Cid::OrderedFlush(raw & VALUE_MASK)
                } else {
                    Cid::Tagged(raw & VALUE_MASK)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_round_trips() {
        let raw = Cid::Tagged(7).encode();
        assert_eq!(Cid::decode(raw, Queue::Io), Cid::Tagged(7));
    }

    #[test]
    fn untagged_round_trips() {
        let raw = Cid::Untagged(0x3FFF).encode();
        assert_eq!(Cid::decode(raw, Queue::Io), Cid::Untagged(0x3FFF));
    }

    #[test]
    fn ordered_flush_round_trips() {
        let raw = Cid::OrderedFlush(7).encode();
        assert_eq!(Cid::decode(raw, Queue::Io), Cid::OrderedFlush(7));
        assert_ne!(raw, Cid::Tagged(7).encode());
    }

    #[test]
    fn admin_init_round_trips() {
        for step in 1u8..=5 {
            let raw = Cid::AdminInit(step).encode();
            assert_eq!(Cid::decode(raw, Queue::Admin), Cid::AdminInit(step));
        }
    }

    #[test]
    fn admin_get_log_round_trips() {
        for idx in 0u8..10 {
            let raw = Cid::AdminGetLog(idx).encode();
            assert_eq!(Cid::decode(raw, Queue::Admin), Cid::AdminGetLog(idx));
        }
    }

    #[test]
    fn shutdown_sentinels_round_trip() {
        assert_eq!(
            Cid::decode(Cid::ShutdownDeleteSq.encode(), Queue::Admin),
            Cid::ShutdownDeleteSq
        );
        assert_eq!(
            Cid::decode(Cid::ShutdownDeleteCq.encode(), Queue::Admin),
            Cid::ShutdownDeleteCq
        );
    }

    #[test]
    fn tagged_and_untagged_domains_disjoint() {
        // bit 15 is the only thing that distinguishes the two domains.
        assert_eq!(Cid::Tagged(5).encode() & 0x8000, 0);
        assert_ne!(Cid::Untagged(5).encode() & 0x8000, 0);
    }
}
