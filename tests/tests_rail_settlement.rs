use railpay::mocks::MockVault;
use railpay::rail_core::{
    audit, Arbiter, ArbitrationDecision, ArbitrationRequest, IdentityArbiter, PaymentLedger,
    RateChange,
};

const TOKEN: u32 = 1;
const PAYER: u64 = 10;
const PAYEE: u64 = 20;
const OPERATOR: u64 = 30;
const ARBITER: u64 = 40;

/// Grants half of every proposed segment amount while settling the full
/// range.
struct HalvingArbiter;

impl Arbiter for HalvingArbiter {
    fn arbitrate(&self, request: &ArbitrationRequest) -> ArbitrationDecision {
        ArbitrationDecision {
            modified_amount: request.proposed_amount / 2,
            settle_upto: request.to_epoch,
            note: "halved".to_string(),
        }
    }
}

/// Claims to settle past the proposed range.
struct OverreachingArbiter;

impl Arbiter for OverreachingArbiter {
    fn arbitrate(&self, request: &ArbitrationRequest) -> ArbitrationDecision {
        ArbitrationDecision {
            modified_amount: request.proposed_amount,
            settle_upto: request.to_epoch + 1,
            note: String::new(),
        }
    }
}

/// Identity up to epoch 3, out-of-range afterwards. Used to prove that a
/// late-segment violation rolls back the earlier segments too.
struct TurncoatArbiter;

impl Arbiter for TurncoatArbiter {
    fn arbitrate(&self, request: &ArbitrationRequest) -> ArbitrationDecision {
        if request.to_epoch <= 3 {
            IdentityArbiter.arbitrate(request)
        } else {
            OverreachingArbiter.arbitrate(request)
        }
    }
}

fn streaming_rail(
    rate: u128,
    period: u64,
    arbiter: Option<(u64, Box<dyn Arbiter>)>,
) -> (PaymentLedger<MockVault>, u64) {
    let vault = MockVault::new();
    vault.set_balance(TOKEN, PAYER, 100_000);
    let mut ledger = PaymentLedger::new(vault);
    ledger.deposit(PAYER, TOKEN, PAYER, 1_000).unwrap();
    ledger.approve_operator(PAYER, TOKEN, OPERATOR, 1_000, 10_000).unwrap();
    let arbiter_addr = arbiter.map(|(addr, imp)| {
        ledger.register_arbiter(addr, imp);
        addr
    });
    let rail_id = ledger.create_rail(OPERATOR, TOKEN, PAYER, PAYEE, arbiter_addr).unwrap();
    ledger.modify_rail_lockup(OPERATOR, rail_id, period, 0).unwrap();
    ledger.modify_rail_payment(OPERATOR, rail_id, rate, 0).unwrap();
    (ledger, rail_id)
}

#[test]
fn test_basic_stream() {
    // Scenario: 1000 funded, rail at 5/epoch over a 10-epoch window.
    let (mut ledger, rail_id) = streaming_rail(5, 10, None);
    ledger.advance_epoch(10).unwrap();

    let result = ledger.settle_rail(PAYEE, rail_id, 10, false).unwrap();
    assert_eq!(result.total_settled, 50);
    assert_eq!(result.final_epoch, 10);

    assert_eq!(ledger.account(TOKEN, PAYER).unwrap().funds, 950);
    assert_eq!(ledger.account(TOKEN, PAYEE).unwrap().funds, 50);
    assert_eq!(ledger.rail(rail_id).unwrap().settled_up_to, 10);
    assert!(audit::check(&ledger).is_empty());
}

#[test]
fn test_settle_is_idempotent_at_fixed_epoch() {
    let (mut ledger, rail_id) = streaming_rail(5, 10, None);
    ledger.advance_epoch(10).unwrap();
    ledger.settle_rail(PAYEE, rail_id, 10, false).unwrap();

    let again = ledger.settle_rail(PAYEE, rail_id, 10, false).unwrap();
    assert_eq!(again.total_settled, 0);
    assert_eq!(again.final_epoch, 10);
    assert_eq!(again.note, "already settled");
    assert_eq!(ledger.account(TOKEN, PAYEE).unwrap().funds, 50);
}

#[test]
fn test_settle_rejects_future_epoch() {
    let (mut ledger, rail_id) = streaming_rail(5, 10, None);
    ledger.advance_epoch(4).unwrap();
    let err = ledger.settle_rail(PAYEE, rail_id, 5, false).unwrap_err();
    assert_eq!(err.error_code(), "EPOCH_OUT_OF_RANGE");
}

#[test]
fn test_settlement_capped_by_lockup_horizon() {
    // Funds cover the lockup window plus 4 elapsed epochs only: the payer
    // deposited 70 against rate 10, period 3.
    let vault = MockVault::new();
    vault.set_balance(TOKEN, PAYER, 100);
    let mut ledger = PaymentLedger::new(vault);
    ledger.deposit(PAYER, TOKEN, PAYER, 70).unwrap();
    ledger.approve_operator(PAYER, TOKEN, OPERATOR, 1_000, 10_000).unwrap();
    let rail_id = ledger.create_rail(OPERATOR, TOKEN, PAYER, PAYEE, None).unwrap();
    ledger.modify_rail_lockup(OPERATOR, rail_id, 3, 0).unwrap();
    ledger.modify_rail_payment(OPERATOR, rail_id, 10, 0).unwrap();

    ledger.advance_epoch(10).unwrap();
    // Lockup settles to epoch 4 (70 funds / rate 10 = 4 whole epochs past
    // the 3-epoch window); settlement reaches 4 + 3 = 7.
    let result = ledger.settle_rail(PAYEE, rail_id, 10, false).unwrap();
    assert_eq!(result.final_epoch, 7);
    assert_eq!(result.total_settled, 70);
    assert_eq!(ledger.account(TOKEN, PAYER).unwrap().funds, 0);
    assert!(audit::check(&ledger).is_empty());
}

#[test]
fn test_terminated_rail_grace_and_finalize() {
    // Scenario: stream settled to 10, terminated at 12, grace through 22.
    let (mut ledger, rail_id) = streaming_rail(5, 10, None);
    ledger.advance_epoch(10).unwrap();
    ledger.settle_rail(PAYEE, rail_id, 10, false).unwrap();

    ledger.advance_epoch(12).unwrap();
    ledger.terminate_rail(PAYER, rail_id).unwrap();

    ledger.advance_epoch(17).unwrap();
    let result = ledger.settle_rail(PAYEE, rail_id, 17, false).unwrap();
    assert_eq!(result.total_settled, 35); // 5 * (17 - 10)
    assert_eq!(ledger.account(TOKEN, PAYEE).unwrap().funds, 85);

    ledger.advance_epoch(25).unwrap();
    let result = ledger.settle_rail(PAYEE, rail_id, 25, false).unwrap();
    assert_eq!(result.total_settled, 25); // 5 * (22 - 17), capped at the window
    assert_eq!(result.final_epoch, 22);
    assert_eq!(ledger.account(TOKEN, PAYEE).unwrap().funds, 110);

    // The next pass finalizes; the one after reports the rail inactive.
    let result = ledger.settle_rail(PAYEE, rail_id, 25, false).unwrap();
    assert_eq!(result.note, "finalized");
    let rail = ledger.rail(rail_id).unwrap();
    assert!(!rail.is_active);
    assert_eq!(rail.payment_rate, 0);
    assert_eq!(rail.lockup_fixed, 0);

    let result = ledger.settle_rail(PAYEE, rail_id, 25, false).unwrap();
    assert_eq!(result.note, "inactive rail");
    assert_eq!(result.total_settled, 0);
    assert!(audit::check(&ledger).is_empty());
}

#[test]
fn test_finalize_releases_fixed_lockup() {
    let (mut ledger, rail_id) = streaming_rail(5, 10, None);
    ledger.modify_rail_lockup(OPERATOR, rail_id, 10, 100).unwrap();
    ledger.terminate_rail(PAYER, rail_id).unwrap();

    ledger.advance_epoch(10).unwrap();
    ledger.settle_rail(PAYEE, rail_id, 10, false).unwrap();
    let result = ledger.settle_rail(PAYEE, rail_id, 10, false).unwrap();
    assert_eq!(result.note, "finalized");
    // 50 paid over the grace window; the 100 security deposit is unlocked
    let acct = ledger.account(TOKEN, PAYER).unwrap();
    assert_eq!(acct.funds, 950);
    assert_eq!(acct.lockup_current, 0);
    assert!(audit::check(&ledger).is_empty());
}

#[test]
fn test_arbiter_partial_amount() {
    // Scenario: rate 10, period 5, arbiter halves every amount.
    let (mut ledger, rail_id) =
        streaming_rail(10, 5, Some((ARBITER, Box::new(HalvingArbiter))));
    ledger.advance_epoch(4).unwrap();

    let result = ledger.settle_rail(PAYEE, rail_id, 4, false).unwrap();
    assert_eq!(result.total_settled, 20); // 10 * 4 / 2
    assert_eq!(result.final_epoch, 4);
    assert_eq!(result.note, "halved");
    assert_eq!(ledger.account(TOKEN, PAYEE).unwrap().funds, 20);
    assert_eq!(ledger.rail(rail_id).unwrap().settled_up_to, 4);
    assert!(audit::check(&ledger).is_empty());
}

#[test]
fn test_rate_change_without_arbiter_settles_immediately() {
    // Scenario: rate 5 from epoch 0, changed to 8 at epoch 3.
    let (mut ledger, rail_id) = streaming_rail(5, 10, None);
    ledger.advance_epoch(3).unwrap();
    ledger.modify_rail_payment(OPERATOR, rail_id, 8, 0).unwrap();

    // The elapsed window settled at the old rate during the change.
    assert_eq!(ledger.rail(rail_id).unwrap().settled_up_to, 3);
    assert_eq!(ledger.account(TOKEN, PAYEE).unwrap().funds, 15);
    assert!(ledger.rail(rail_id).unwrap().rate_queue.is_empty());

    ledger.advance_epoch(7).unwrap();
    let result = ledger.settle_rail(PAYEE, rail_id, 7, false).unwrap();
    assert_eq!(result.total_settled, 32); // 8 * (7 - 3)
    assert_eq!(ledger.account(TOKEN, PAYEE).unwrap().funds, 47);
}

#[test]
fn test_rate_change_with_arbiter_queues_old_rate() {
    // Scenario: with an arbiter the old rate is queued, not settled; a
    // later settlement applies 5 for epochs 0-3 and 8 for 3-7.
    let (mut ledger, rail_id) =
        streaming_rail(5, 10, Some((ARBITER, Box::new(IdentityArbiter))));
    ledger.advance_epoch(3).unwrap();
    ledger.modify_rail_payment(OPERATOR, rail_id, 8, 0).unwrap();

    let rail = ledger.rail(rail_id).unwrap();
    assert_eq!(rail.settled_up_to, 0);
    assert_eq!(rail.rate_queue.newest(), Some(&RateChange { rate: 5, until_epoch: 3 }));

    ledger.advance_epoch(7).unwrap();
    let result = ledger.settle_rail(PAYEE, rail_id, 7, false).unwrap();
    assert_eq!(result.total_settled, 47); // 5*3 + 8*4
    assert_eq!(result.final_epoch, 7);
    assert_eq!(ledger.account(TOKEN, PAYEE).unwrap().funds, 47);
    assert!(ledger.rail(rail_id).unwrap().rate_queue.is_empty());
    assert!(audit::check(&ledger).is_empty());
}

#[test]
fn test_arbiter_violation_is_fatal_and_rolls_back() {
    let (mut ledger, rail_id) =
        streaming_rail(10, 5, Some((ARBITER, Box::new(OverreachingArbiter))));
    ledger.advance_epoch(4).unwrap();

    let err = ledger.settle_rail(PAYEE, rail_id, 4, false).unwrap_err();
    assert_eq!(err.error_code(), "ARBITER_CONTRACT_VIOLATION");
    // nothing moved
    assert!(ledger.account(TOKEN, PAYEE).is_none());
    assert_eq!(ledger.rail(rail_id).unwrap().settled_up_to, 0);
    assert!(audit::check(&ledger).is_empty());
}

#[test]
fn test_late_segment_violation_rolls_back_settled_segments() {
    let (mut ledger, rail_id) =
        streaming_rail(5, 10, Some((ARBITER, Box::new(TurncoatArbiter))));
    ledger.advance_epoch(3).unwrap();
    ledger.modify_rail_payment(OPERATOR, rail_id, 8, 0).unwrap();
    ledger.advance_epoch(7).unwrap();

    let payer_before = ledger.account(TOKEN, PAYER).unwrap().clone();
    let err = ledger.settle_rail(PAYEE, rail_id, 7, false).unwrap_err();
    assert_eq!(err.error_code(), "ARBITER_CONTRACT_VIOLATION");

    // The 0-3 segment had settled before the violation; all of it unwound.
    let rail = ledger.rail(rail_id).unwrap();
    assert_eq!(rail.settled_up_to, 0);
    assert_eq!(rail.rate_queue.len(), 2);
    assert!(ledger.account(TOKEN, PAYEE).is_none());
    assert_eq!(ledger.account(TOKEN, PAYER).unwrap(), &payer_before);
}

#[test]
fn test_skip_arbitration_is_payer_only() {
    let (mut ledger, rail_id) =
        streaming_rail(10, 5, Some((ARBITER, Box::new(HalvingArbiter))));
    ledger.advance_epoch(4).unwrap();

    let err = ledger.settle_rail(PAYEE, rail_id, 4, true).unwrap_err();
    assert_eq!(err.error_code(), "AUTHORIZATION_DENIED");

    let result = ledger.settle_rail(PAYER, rail_id, 4, true).unwrap();
    assert_eq!(result.total_settled, 40); // full amount, arbiter bypassed
    assert_eq!(ledger.account(TOKEN, PAYEE).unwrap().funds, 40);
}

#[test]
fn test_zero_rate_fast_path() {
    let vault = MockVault::new();
    vault.set_balance(TOKEN, PAYER, 100);
    let mut ledger = PaymentLedger::new(vault);
    ledger.deposit(PAYER, TOKEN, PAYER, 100).unwrap();
    ledger.approve_operator(PAYER, TOKEN, OPERATOR, 1_000, 10_000).unwrap();
    let rail_id = ledger.create_rail(OPERATOR, TOKEN, PAYER, PAYEE, None).unwrap();
    ledger.modify_rail_lockup(OPERATOR, rail_id, 5, 0).unwrap();

    ledger.advance_epoch(6).unwrap();
    let result = ledger.settle_rail(PAYEE, rail_id, 6, false).unwrap();
    assert_eq!(result.total_settled, 0);
    assert_eq!(result.final_epoch, 6);
    assert_eq!(result.note, "zero rate");
    assert!(ledger.account(TOKEN, PAYEE).is_none());
}

#[test]
fn test_settle_batch_aborts_and_unwinds_whole_batch() {
    let vault = MockVault::new();
    vault.set_balance(TOKEN, PAYER, 100_000);
    let mut ledger = PaymentLedger::new(vault);
    ledger.deposit(PAYER, TOKEN, PAYER, 10_000).unwrap();
    ledger.approve_operator(PAYER, TOKEN, OPERATOR, 1_000, 10_000).unwrap();
    ledger.register_arbiter(ARBITER, Box::new(OverreachingArbiter));

    let good = ledger.create_rail(OPERATOR, TOKEN, PAYER, PAYEE, None).unwrap();
    ledger.modify_rail_lockup(OPERATOR, good, 10, 0).unwrap();
    ledger.modify_rail_payment(OPERATOR, good, 5, 0).unwrap();
    let bad = ledger.create_rail(OPERATOR, TOKEN, PAYER, PAYEE, Some(ARBITER)).unwrap();
    ledger.modify_rail_lockup(OPERATOR, bad, 10, 0).unwrap();
    ledger.modify_rail_payment(OPERATOR, bad, 7, 0).unwrap();

    ledger.advance_epoch(5).unwrap();
    let err = ledger.settle_rail_batch(PAYEE, &[good, bad]).unwrap_err();
    assert_eq!(err.error_code(), "ARBITER_CONTRACT_VIOLATION");
    // The good rail's settlement was unwound along with the bad one.
    assert_eq!(ledger.rail(good).unwrap().settled_up_to, 0);
    assert!(ledger.account(TOKEN, PAYEE).is_none());

    let results = ledger.settle_rail_batch(PAYEE, &[good]).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].total_settled, 25);
    assert_eq!(ledger.account(TOKEN, PAYEE).unwrap().funds, 25);
    assert!(audit::check(&ledger).is_empty());
}
