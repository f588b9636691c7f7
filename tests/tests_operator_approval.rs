use railpay::mocks::MockVault;
use railpay::rail_core::{LedgerError, PaymentLedger};

const TOKEN: u32 = 1;
const PAYER: u64 = 10;
const PAYEE: u64 = 20;
const OPERATOR: u64 = 30;

fn funded_ledger() -> PaymentLedger<MockVault> {
    let vault = MockVault::new();
    vault.set_balance(TOKEN, PAYER, 100_000);
    let mut ledger = PaymentLedger::new(vault);
    ledger.deposit(PAYER, TOKEN, PAYER, 10_000).unwrap();
    ledger
}

#[test]
fn test_rate_usage_tracks_rail_rate() {
    let mut ledger = funded_ledger();
    ledger.approve_operator(PAYER, TOKEN, OPERATOR, 10, 1_000).unwrap();
    let rail_id = ledger.create_rail(OPERATOR, TOKEN, PAYER, PAYEE, None).unwrap();
    ledger.modify_rail_lockup(OPERATOR, rail_id, 10, 0).unwrap();

    // Creation consumes nothing; the rate change books the usage.
    assert_eq!(ledger.approval(TOKEN, PAYER, OPERATOR).unwrap().rate_usage, 0);
    ledger.modify_rail_payment(OPERATOR, rail_id, 10, 0).unwrap();
    let approval = ledger.approval(TOKEN, PAYER, OPERATOR).unwrap();
    assert_eq!(approval.rate_usage, 10);
    assert_eq!(approval.lockup_usage, 100);
}

#[test]
fn test_rate_increase_beyond_allowance_rejected() {
    let mut ledger = funded_ledger();
    ledger.approve_operator(PAYER, TOKEN, OPERATOR, 10, 1_000).unwrap();
    let rail_id = ledger.create_rail(OPERATOR, TOKEN, PAYER, PAYEE, None).unwrap();
    ledger.modify_rail_lockup(OPERATOR, rail_id, 10, 0).unwrap();

    let err = ledger.modify_rail_payment(OPERATOR, rail_id, 11, 0).unwrap_err();
    assert_eq!(err.error_code(), "ALLOWANCE_EXCEEDED");
    // rollback: no usage, no rate, no lockup
    let approval = ledger.approval(TOKEN, PAYER, OPERATOR).unwrap();
    assert_eq!(approval.rate_usage, 0);
    assert_eq!(approval.lockup_usage, 0);
    assert_eq!(ledger.rail(rail_id).unwrap().payment_rate, 0);
    assert_eq!(ledger.account(TOKEN, PAYER).unwrap().lockup_rate, 0);
}

#[test]
fn test_decrease_admitted_after_allowance_reduced() {
    // Scenario: allowance 10, rail at rate 10, allowance cut to 3. The
    // decrease to rate 2 is still admitted and usage lands at 2.
    let mut ledger = funded_ledger();
    ledger.approve_operator(PAYER, TOKEN, OPERATOR, 10, 1_000).unwrap();
    let rail_id = ledger.create_rail(OPERATOR, TOKEN, PAYER, PAYEE, None).unwrap();
    ledger.modify_rail_lockup(OPERATOR, rail_id, 10, 0).unwrap();
    ledger.modify_rail_payment(OPERATOR, rail_id, 10, 0).unwrap();

    ledger.set_operator_approval(PAYER, TOKEN, OPERATOR, true, 3, 1_000).unwrap();
    assert_eq!(ledger.approval(TOKEN, PAYER, OPERATOR).unwrap().rate_allowance, 3);
    assert_eq!(ledger.approval(TOKEN, PAYER, OPERATOR).unwrap().rate_usage, 10);

    ledger.modify_rail_payment(OPERATOR, rail_id, 2, 0).unwrap();
    let approval = ledger.approval(TOKEN, PAYER, OPERATOR).unwrap();
    assert_eq!(approval.rate_usage, 2);
    assert_eq!(ledger.rail(rail_id).unwrap().payment_rate, 2);

    // Climbing back above the reduced allowance is refused.
    let err = ledger.modify_rail_payment(OPERATOR, rail_id, 4, 0).unwrap_err();
    assert_eq!(err.error_code(), "ALLOWANCE_EXCEEDED");
}

#[test]
fn test_set_operator_approval_can_disapprove() {
    let mut ledger = funded_ledger();
    ledger.set_operator_approval(PAYER, TOKEN, OPERATOR, false, 10, 100).unwrap();
    let err = ledger.create_rail(OPERATOR, TOKEN, PAYER, PAYEE, None).unwrap_err();
    assert_eq!(
        err,
        LedgerError::OperatorNotApproved { token: TOKEN, payer: PAYER, operator: OPERATOR }
    );
}

#[test]
fn test_approvals_are_scoped_per_token_and_payer() {
    let mut ledger = funded_ledger();
    ledger.approve_operator(PAYER, TOKEN, OPERATOR, 10, 100).unwrap();

    // Different token: unapproved.
    let err = ledger.create_rail(OPERATOR, TOKEN + 1, PAYER, PAYEE, None).unwrap_err();
    assert_eq!(err.error_code(), "OPERATOR_NOT_APPROVED");
    // Different payer: unapproved.
    let err = ledger.create_rail(OPERATOR, TOKEN, PAYEE, PAYER, None).unwrap_err();
    assert_eq!(err.error_code(), "OPERATOR_NOT_APPROVED");
}

#[test]
fn test_winding_down_after_operator_terminated() {
    // Allowances are zeroed, yet the operator can still reduce the rail and
    // release lockup; usage follows the decreases down.
    let mut ledger = funded_ledger();
    ledger.approve_operator(PAYER, TOKEN, OPERATOR, 10, 1_000).unwrap();
    let rail_id = ledger.create_rail(OPERATOR, TOKEN, PAYER, PAYEE, None).unwrap();
    ledger.modify_rail_lockup(OPERATOR, rail_id, 10, 0).unwrap();
    ledger.modify_rail_payment(OPERATOR, rail_id, 10, 0).unwrap();

    ledger.terminate_operator(PAYER, TOKEN, OPERATOR).unwrap();

    ledger.modify_rail_payment(OPERATOR, rail_id, 0, 0).unwrap();
    let approval = ledger.approval(TOKEN, PAYER, OPERATOR).unwrap();
    assert_eq!(approval.rate_usage, 0);
    assert_eq!(approval.lockup_usage, 0);
    assert_eq!(ledger.account(TOKEN, PAYER).unwrap().lockup_current, 0);

    // And any increase is refused against the zeroed allowance.
    let err = ledger.modify_rail_payment(OPERATOR, rail_id, 1, 0).unwrap_err();
    assert_eq!(err.error_code(), "ALLOWANCE_EXCEEDED");
}
