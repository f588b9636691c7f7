//! Scripted walkthrough of a rail's life: fund, approve, stream, terminate,
//! finalize, withdraw. Drives the ledger the way a host would, with the
//! mock vault standing in for token custody.

use std::sync::Arc;

use anyhow::{anyhow, Result};

use railpay::mocks::MockVault;
use railpay::models::AmountCodec;
use railpay::rail_core::{audit, PaymentLedger};
use railpay::token_registry::TokenRegistry;

const TOKEN: u32 = 0; // FIL in the seeded registry
const PAYER: u64 = 101;
const PAYEE: u64 = 202;
const OPERATOR: u64 = 303;

/// One whole FIL in atto units.
const UNIT: u128 = 1_000_000_000_000_000_000;

fn main() -> Result<()> {
    railpay::logger::setup_logger().map_err(|e| anyhow!("logger setup failed: {}", e))?;

    let registry = Arc::new(TokenRegistry::seeded());
    let codec = AmountCodec::new(registry);

    let vault = MockVault::new();
    vault.set_balance(TOKEN, PAYER, 1_000 * UNIT);
    let mut ledger = PaymentLedger::new(vault.clone());

    // Epoch 0: fund the payer, authorize the operator, open the rail.
    ledger.deposit(PAYER, TOKEN, PAYER, 1_000 * UNIT)?;
    ledger.approve_operator(PAYER, TOKEN, OPERATOR, 10 * UNIT, 1_000 * UNIT)?;
    let rail_id = ledger.create_rail(OPERATOR, TOKEN, PAYER, PAYEE, None)?;
    ledger.modify_rail_lockup(OPERATOR, rail_id, 10, 0)?;
    ledger.modify_rail_payment(OPERATOR, rail_id, 5 * UNIT, 0)?;
    log::info!("rail {} streaming at 5 FIL/epoch with a 10-epoch lockup window", rail_id);

    // Ten epochs pass; anyone may settle.
    ledger.advance_epoch(10)?;
    let result = ledger.settle_rail(PAYEE, rail_id, 10, false)?;
    log::info!(
        "settled {} through epoch {} ({})",
        result.total_settled,
        result.final_epoch,
        result.note
    );

    // The payer pulls the plug; the rail keeps paying through its grace
    // window and finalizes on the settlement after that.
    ledger.advance_epoch(12)?;
    ledger.terminate_rail(PAYER, rail_id)?;
    ledger.advance_epoch(25)?;
    let grace = ledger.settle_rail(PAYEE, rail_id, 25, false)?;
    log::info!("grace window paid {} ({})", grace.total_settled, grace.note);
    let fin = ledger.settle_rail(PAYEE, rail_id, 25, false)?;
    log::info!("final pass: {}", fin.note);

    // Payee takes the proceeds out through the vault.
    let payee_funds = ledger.account(TOKEN, PAYEE).map(|a| a.funds).unwrap_or(0);
    ledger.withdraw(PAYEE, TOKEN, payee_funds)?;

    for finding in audit::check(&ledger) {
        log::error!("audit: {} - {}", finding.entity, finding.message);
    }

    if let Some(amount) = codec.to_client_amount_struct(TOKEN, vault.balance_of(TOKEN, PAYEE)) {
        log::info!("payee external balance: {} {}", amount.amount, amount.token);
    }
    log::info!(
        "payer account funds remaining: {}",
        ledger.account(TOKEN, PAYER).map(|a| a.funds).unwrap_or(0)
    );
    for event in ledger.drain_events() {
        log::debug!("event: {:?}", event);
    }
    Ok(())
}
