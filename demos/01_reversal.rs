/// payment reversal - an overpayment is applied, then exactly undone
use utility_billing_rs::chrono::{NaiveDate, TimeZone, Utc};
use utility_billing_rs::{
    AccountScope, BillingEngine, ClientConfig, InMemoryCacheStore, InMemoryLedger, Money,
    PeriodKey, SafeTimeProvider, TimeSource,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // pin the clock so the run is reproducible
    let time = SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2025, 8, 15, 12, 0, 0).unwrap(),
    ));
    let mut engine = BillingEngine::new(
        ClientConfig::hoa_water(),
        InMemoryLedger::new(),
        InMemoryCacheStore::new(),
        time,
    )?;

    engine.register_account("unit-7".to_string());
    engine.generate_period(
        &"unit-7".to_string(),
        PeriodKey::new(2025, 0)?,
        Money::from_pesos(500),
        None,
    )?;

    // one cycle past the july 10 due date: 5% penalty
    let as_of = NaiveDate::from_ymd_opt(2025, 7, 20).unwrap();
    engine.recalculate_penalties(&AccountScope::All, Some(as_of));

    // 600.00 covers 525.00 due; the rest becomes standing credit
    let result = engine.post_payment(&"unit-7".to_string(), Money::from_pesos(600), Some(as_of))?;
    println!(
        "paid {}, credit now {}",
        result.amount, result.credit_balance_after
    );

    // the bank bounced the check: undo the payment exactly
    engine.delete_payment(result.transaction_id, Some(as_of))?;
    let period = engine.store().period(&"unit-7".to_string(), PeriodKey::new(2025, 0)?)?;
    println!(
        "after reversal: paid {}, status {:?}, credit {}",
        period.paid_amount,
        period.status(),
        engine.credit_balance(&"unit-7".to_string())?
    );

    Ok(())
}
