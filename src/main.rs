//! Demo driver: encrypts a value, evaluates a polynomial preset through the service and
//! reports timings.

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ckks_eval_core::{
    load_config, EvaluationRequest, EvaluationService, Identity, Payload, PolicyDecision,
    PolynomialChoice, PolynomialSpec, SessionContext, TracingAuditSink,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Evaluate a scoring polynomial over an encrypted value")]
struct Args {
    /// YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Plaintext input encrypted on the client side
    #[arg(long, default_value_t = 5.0)]
    value: f64,

    /// Polynomial preset
    #[arg(long, default_value = "loan")]
    preset: String,

    /// Number of evaluations to time
    #[arg(long, default_value_t = 3)]
    repeat: usize,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let params = config.context.scheme_parameters();
    println!("Initializing CKKS context:");
    println!(
        "N = {}, chain = {:?}, scale = 2^{}",
        params.poly_modulus_degree,
        params.coeff_mod_bit_sizes,
        params.global_scale.log2()
    );

    let session = Arc::new(SessionContext::new());
    let keygen_start = Instant::now();
    let context_id = session.initialize(params)?;
    if !config.context.galois_steps.is_empty() {
        session.attach_galois_keys(&config.context.galois_steps)?;
    }
    println!("Key generation: {:?} (context {context_id})", keygen_start.elapsed());

    let service = EvaluationService::new(session.clone(), Arc::new(TracingAuditSink));
    let spec = PolynomialSpec::preset(&args.preset)?;
    let ctx = session.current()?;
    let input = ctx.encrypt(&[args.value])?.to_bytes()?;
    let request = EvaluationRequest {
        payload: Payload::Encrypted(input),
        polynomial: PolynomialChoice::Coefficients(spec.coefficients().to_vec()),
        preview: config.preview.noise_params()?,
    };
    let identity = Identity::new("demo", &["analyst"]);

    let mut times = Vec::with_capacity(args.repeat);
    let mut last = None;
    for _ in 0..args.repeat.max(1) {
        let start = Instant::now();
        let response = service.evaluate(&identity, PolicyDecision::Allow, &request)?;
        times.push(start.elapsed());
        last = Some(response);
    }
    let Some(response) = last else {
        return Ok(());
    };

    let decrypted = ctx.decrypt_bytes(&response.encrypted_result)?;
    println!("\nEvaluation {}:", response.evaluation_id);
    println!("Polynomial: {:?}", spec.coefficients());
    println!("Decrypted result: {:.6}", decrypted[0]);
    if let Some(preview) = &response.plain_preview {
        println!("Noised preview: {:.6}", preview[0]);
    }
    println!("Ciphertext size: {} bytes", response.encrypted_result.len());

    let total: Duration = times.iter().sum();
    println!("\nEvaluation statistics:");
    println!("Count: {}", times.len());
    println!("Average time: {:?}", total / times.len() as u32);
    if let (Some(max), Some(min)) = (times.iter().max(), times.iter().min()) {
        println!("Maximum time: {max:?}");
        println!("Minimum time: {min:?}");
    }
    Ok(())
}
