//! Policy-update commands from the decision service, delivered to the
//! owning shard's mailbox and applied between bursts.

use crate::{FlowEntry, FlowState, FlowTable, Granted, Declined};
use clock::Clock;
use net::FlowKey;

/// Parameters of a capability decision for one flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub flow: FlowKey,
    pub action: PolicyAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyAction {
    Grant {
        cap_expire_sec: u32,
        tx_rate_kb_sec: u32,
        next_renewal_ms: u32,
        renewal_step_ms: u32,
    },
    Decline {
        expire_sec: u32,
    },
}

/// A command entry as carried by a shard's mailbox. Policy addition is
/// the only operation today; the type leaves room for more.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GkCmd {
    AddPolicy(Policy),
}

/// Apply a policy to the shard's table: look the flow up, creating a
/// fresh Request entry when it is unknown, then switch it to the decided
/// state. All deadlines are measured from `now`.
pub fn apply_policy(table: &mut FlowTable, clock: &Clock, now: u64, policy: Policy) {
    let hash = policy.flow.rss_hash();

    let idx = match table.lookup(&policy.flow, hash) {
        Some(idx) => idx,
        None => {
            match table.insert(FlowEntry::initialize(policy.flow, now), hash) {
                Ok(idx) => idx,
                Err(err) => {
                    tracing::error!(flow = %policy.flow, %err, "gk: failed to add policy flow");
                    return;
                }
            }
        }
    };
    let entry = table.entry_mut(idx);

    match policy.action {
        PolicyAction::Grant {
            cap_expire_sec,
            tx_rate_kb_sec,
            next_renewal_ms,
            renewal_step_ms,
        } => {
            entry.state = FlowState::Granted(Granted {
                cap_expire_at: now + cap_expire_sec as u64 * clock.ticks_per_sec(),
                budget_renew_at: now + clock.ticks_per_sec(),
                tx_rate_kb_cycle: tx_rate_kb_sec,
                budget_byte: tx_rate_kb_sec as i64 * 1024,
                grantor_id: 0, // TODO fill from the grantor FIB entry
                send_next_renewal_at: now + next_renewal_ms as u64 * clock.ticks_per_ms(),
                renewal_step_cycle: renewal_step_ms as u64 * clock.ticks_per_ms(),
            });
        }
        PolicyAction::Decline { expire_sec } => {
            entry.state = FlowState::Declined(Declined {
                expire_at: now + expire_sec as u64 * clock.ticks_per_sec(),
            });
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn flow() -> FlowKey {
        FlowKey::V4 {
            src: "10.0.0.1".parse().unwrap(),
            dst: "192.168.0.9".parse().unwrap(),
            proto: 17,
        }
    }

    fn grant() -> PolicyAction {
        PolicyAction::Grant {
            cap_expire_sec: 600,
            tx_rate_kb_sec: 10,
            next_renewal_ms: 100,
            renewal_step_ms: 50,
        }
    }

    #[test]
    fn test_grant_creates_and_parameterizes_entry() {
        let clock = Clock::new(2_000_000_000);
        let mut table = FlowTable::with_capacity(8);
        let now = 5_000;

        apply_policy(&mut table, &clock, now, Policy { flow: flow(), action: grant() });

        let idx = table.lookup(&flow(), flow().rss_hash()).unwrap();
        let FlowState::Granted(granted) = &table.entry(idx).state else {
            panic!("entry is granted");
        };
        assert_eq!(granted.cap_expire_at, now + 600 * clock.ticks_per_sec());
        assert_eq!(granted.budget_renew_at, now + clock.ticks_per_sec());
        assert_eq!(granted.tx_rate_kb_cycle, 10);
        assert_eq!(granted.budget_byte, 10 * 1024);
        assert_eq!(granted.send_next_renewal_at, now + 100 * clock.ticks_per_ms());
        assert_eq!(granted.renewal_step_cycle, 50 * clock.ticks_per_ms());
    }

    #[test]
    fn test_decline_is_idempotent() {
        let clock = Clock::new(2_000_000_000);
        let mut table = FlowTable::with_capacity(8);
        let decline = Policy {
            flow: flow(),
            action: PolicyAction::Decline { expire_sec: 30 },
        };

        let now = 5_000;
        apply_policy(&mut table, &clock, now, decline.clone());
        apply_policy(&mut table, &clock, now, decline);

        let idx = table.lookup(&flow(), flow().rss_hash()).unwrap();
        let FlowState::Declined(declined) = &table.entry(idx).state else {
            panic!("entry is declined");
        };
        assert_eq!(declined.expire_at, now + 30 * clock.ticks_per_sec());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_grant_overrides_existing_request_entry() {
        let clock = Clock::new(2_000_000_000);
        let mut table = FlowTable::with_capacity(8);
        let now = 5_000;

        let hash = flow().rss_hash();
        let idx = table.insert(FlowEntry::initialize(flow(), now), hash).unwrap();

        apply_policy(&mut table, &clock, now + 10, Policy { flow: flow(), action: grant() });

        // Same slot, new state.
        assert_eq!(table.lookup(&flow(), hash), Some(idx));
        assert!(matches!(table.entry(idx).state, FlowState::Granted(_)));
    }

    #[test]
    fn test_policy_for_full_table_is_discarded() {
        let clock = Clock::new(2_000_000_000);
        let mut table = FlowTable::with_capacity(1);
        let other = FlowKey::V4 {
            src: "10.9.9.9".parse().unwrap(),
            dst: "192.168.0.9".parse().unwrap(),
            proto: 17,
        };
        table
            .insert(FlowEntry::initialize(other, 0), other.rss_hash())
            .unwrap();

        apply_policy(
            &mut table,
            &clock,
            0,
            Policy { flow: flow(), action: grant() },
        );
        assert_eq!(table.lookup(&flow(), flow().rss_hash()), None);
        assert_eq!(table.len(), 1);
    }
}
