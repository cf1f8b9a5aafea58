/// quick start - bill a unit, take a payment, read the aggregated model
use utility_billing_rs::{
    AccountScope, BillingEngine, ClientConfig, InMemoryCacheStore, InMemoryLedger, Money,
    PeriodKey, SafeTimeProvider, TimeSource,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let time = SafeTimeProvider::new(TimeSource::System);
    let mut engine = BillingEngine::new(
        ClientConfig::hoa_water(),
        InMemoryLedger::new(),
        InMemoryCacheStore::new(),
        time,
    )?;

    // bill unit-103 for the first fiscal month: 500.00
    engine.register_account("unit-103".to_string());
    engine.generate_period(
        &"unit-103".to_string(),
        PeriodKey::new(2025, 0)?,
        Money::from_decimal_str("500.00")?,
        None,
    )?;

    // penalties as of today, then a partial payment
    engine.recalculate_penalties(&AccountScope::All, None);
    let result = engine.post_payment(&"unit-103".to_string(), Money::from_pesos(300), None)?;
    println!(
        "applied {} across {} period(s), credit delta {}",
        result.amount,
        result.allocations.len(),
        result.credit_delta
    );

    // the versioned read-model
    let model = engine.aggregated_data()?;
    println!(
        "v{}: outstanding {}",
        model.version, model.totals.total_outstanding
    );

    Ok(())
}
