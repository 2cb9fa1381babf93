use advisory_escrow_engine::{
    clock::SystemClock,
    config::EngineConfig,
    directory::{InMemoryCatalog, InMemoryDirectory, Party, Role},
    engine::{Actor, BookingEngine, CreateAdvisoryInput, HoldPaymentInput},
    notify::LogNotifier,
    store::InMemoryStore,
};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Advisory escrow engine demo starting");

    // Create components
    let directory = Arc::new(InMemoryDirectory::new());
    let engine = Arc::new(BookingEngine::new(
        Arc::new(InMemoryStore::new()),
        directory.clone(),
        Arc::new(InMemoryCatalog::with_categories(&["finanzas", "legal"])),
        Arc::new(SystemClock),
        Arc::new(LogNotifier),
        EngineConfig::default(),
    ));

    // Seed two parties
    let client = Party {
        party_id: Uuid::new_v4(),
        email: "ana@example.com".to_string(),
        display_name: "Ana".to_string(),
        roles: vec![Role::Cliente],
        active: true,
    };
    let expert = Party {
        party_id: Uuid::new_v4(),
        email: "bruno@example.com".to_string(),
        display_name: "Bruno".to_string(),
        roles: vec![Role::Experto],
        active: true,
    };
    directory.register(client.clone()).await;
    directory.register(expert.clone()).await;

    // Hold 100.00 in escrow
    let payment = engine
        .hold_payment(HoldPaymentInput {
            cliente_id: client.party_id,
            experto_id: expert.party_id,
            monto_centavos: 10_000,
            metodo: "tarjeta".to_string(),
            transaccion_externa_id: None,
        })
        .await?;
    info!(
        payment_id = ?payment.payment_id,
        commission = payment.commission,
        expert_amount = payment.expert_amount,
        "escrow held"
    );

    // Book tomorrow's slot
    let advisory = engine
        .create_advisory(CreateAdvisoryInput {
            titulo: "Planificación fiscal".to_string(),
            categoria: "finanzas".to_string(),
            fecha_hora_inicio: Utc::now() + Duration::days(1),
            duracion_minutos: 60,
            cliente_email: client.email.clone(),
            experto_email: expert.email.clone(),
            pago_id: payment.payment_id,
        })
        .await?;

    info!(code = %advisory.code, "advisory booked");

    // Finalize and release
    let done = engine
        .finalize_advisory(advisory.advisory_id, Actor::Party(expert.party_id))
        .await?;
    let released = engine.get_payment(payment.payment_id).await?;

    println!("\n=== BOOKING RESULT ===");
    println!("Advisory: {} [{}]", done.code, done.state);
    println!(
        "Window:   {} → {}",
        done.start_time.to_rfc3339(),
        done.end_time.to_rfc3339()
    );
    println!(
        "Escrow:   {} cents held, {} commission, {} to expert [{}]",
        released.amount, released.commission, released.expert_amount, released.state
    );

    Ok(())
}
