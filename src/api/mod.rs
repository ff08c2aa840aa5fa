use axum::{
    Router,
    extract::{Json, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::core::{
    GrowthRates, Inputs, Mode, PensionIncome, Rules, StartingBalances, WithholdingTaxes,
    run_detailed, run_success_rate,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliCommand {
    Detailed,
    SuccessRate,
    Serve,
}

#[derive(Parser, Debug)]
#[command(
    name = "drawdown",
    about = "Tax-aware retirement drawdown simulator (RRSP, taxable, TFSA and cash cushion)"
)]
pub struct Cli {
    #[arg(value_enum, help = "Defaults to the `mode` in the inputs file, then detailed")]
    command: Option<CliCommand>,
    #[arg(long, default_value = "inputs.yml", help = "YAML inputs file")]
    inputs: PathBuf,
    #[arg(long, help = "Monte Carlo trials, overrides total_runs")]
    trials: Option<u32>,
    #[arg(long, help = "Base seed for reproducible return sequences")]
    seed: Option<u64>,
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    retirement_age: Option<u32>,
    max_age: Option<u32>,
    province_code: Option<String>,
    desired_spending: Option<f64>,
    annual_tfsa_contribution: Option<f64>,

    rrsp: Option<f64>,
    taxable: Option<f64>,
    tfsa: Option<f64>,
    cash_cushion: Option<f64>,

    return_sequence_type: Option<String>,
    average_return: Option<f64>,
    min_return: Option<f64>,
    max_return: Option<f64>,
    savings_rate: Option<f64>,
    downturn_threshold: Option<f64>,

    cpp_start_age: Option<u32>,
    cpp_monthly_amount: Option<f64>,
    rrsp_withholding_rate: Option<f64>,

    success_factor: Option<f64>,
    total_runs: Option<u32>,
    seed: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Runs the mode picked on the command line or in the inputs file.
pub async fn run(cli: Cli) -> Result<(), String> {
    let rules = Rules::embedded().map_err(|e| e.to_string())?;

    if cli.command == Some(CliCommand::Serve) {
        return run_http_server(cli.port, rules)
            .await
            .map_err(|e| format!("Server error: {e}"));
    }

    let command = cli.command;
    let inputs = build_inputs(&cli)?;
    let mode = match command {
        Some(CliCommand::SuccessRate) => Mode::SuccessRate,
        Some(_) => Mode::Detailed,
        None => inputs.mode.unwrap_or(Mode::Detailed),
    };

    let output = tokio::task::spawn_blocking(move || run_mode(mode, &inputs, &rules))
        .await
        .map_err(|e| format!("simulation task failed: {e}"))??;
    println!("{output}");
    Ok(())
}

fn run_mode(mode: Mode, inputs: &Inputs, rules: &Rules) -> Result<String, String> {
    let rendered = match mode {
        Mode::Detailed => {
            let detailed = run_detailed(inputs, rules).map_err(|e| e.to_string())?;
            serde_json::to_string_pretty(&detailed)
        }
        Mode::SuccessRate => {
            let results =
                run_success_rate(inputs, rules, inputs.total_runs).map_err(|e| e.to_string())?;
            serde_json::to_string_pretty(&results.summary())
        }
    };
    rendered.map_err(|e| format!("failed to render results: {e}"))
}

fn build_inputs(cli: &Cli) -> Result<Inputs, String> {
    let mut inputs = Inputs::from_path(&cli.inputs)
        .map_err(|e| format!("{}: {e}", cli.inputs.display()))?;

    if let Some(trials) = cli.trials {
        if trials == 0 {
            return Err("--trials must be > 0".to_string());
        }
        inputs.total_runs = trials;
    }
    if let Some(seed) = cli.seed {
        inputs.seed = Some(seed);
    }
    Ok(inputs)
}

pub async fn run_http_server(port: u16, rules: Rules) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .route(
            "/api/success-rate",
            get(success_rate_get_handler).post(success_rate_post_handler),
        )
        .fallback(not_found_handler)
        .with_state(rules);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "drawdown HTTP API listening");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_get_handler(
    State(rules): State<Rules>,
    Query(payload): Query<SimulatePayload>,
) -> Response {
    handle(rules, payload, Mode::Detailed).await
}

async fn simulate_post_handler(
    State(rules): State<Rules>,
    Json(payload): Json<SimulatePayload>,
) -> Response {
    handle(rules, payload, Mode::Detailed).await
}

async fn success_rate_get_handler(
    State(rules): State<Rules>,
    Query(payload): Query<SimulatePayload>,
) -> Response {
    handle(rules, payload, Mode::SuccessRate).await
}

async fn success_rate_post_handler(
    State(rules): State<Rules>,
    Json(payload): Json<SimulatePayload>,
) -> Response {
    handle(rules, payload, Mode::SuccessRate).await
}

async fn handle(rules: Rules, payload: SimulatePayload, mode: Mode) -> Response {
    let inputs = match inputs_from_payload(payload) {
        Ok(inputs) => inputs,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    let outcome = tokio::task::spawn_blocking(move || match mode {
        Mode::Detailed => run_detailed(&inputs, &rules).map(|detailed| {
            serde_json::to_value(detailed).map_err(|e| e.to_string())
        }),
        Mode::SuccessRate => run_success_rate(&inputs, &rules, inputs.total_runs).map(|results| {
            serde_json::to_value(results.summary()).map_err(|e| e.to_string())
        }),
    })
    .await;

    match outcome {
        Ok(Ok(Ok(body))) => json_response(StatusCode::OK, body),
        Ok(Ok(Err(msg))) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &msg),
        Ok(Err(e)) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
        Err(e) => {
            error!(error = %e, "simulation task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "simulation task failed")
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        "no-store".parse().expect("valid header"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn inputs_from_json(json: &str) -> Result<Inputs, String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    inputs_from_payload(payload)
}

fn inputs_from_payload(payload: SimulatePayload) -> Result<Inputs, String> {
    let mut inputs = default_inputs_for_api();

    if let Some(v) = payload.retirement_age {
        inputs.retirement_age = v;
    }
    if let Some(v) = payload.max_age {
        inputs.max_age = v;
    }
    if let Some(v) = payload.province_code {
        inputs.province_code = v;
    }
    if let Some(v) = payload.desired_spending {
        inputs.desired_spending = v;
    }
    if let Some(v) = payload.annual_tfsa_contribution {
        inputs.annual_tfsa_contribution = v;
    }

    if let Some(v) = payload.rrsp {
        inputs.accounts.rrsp = v;
    }
    if let Some(v) = payload.taxable {
        inputs.accounts.taxable = v;
    }
    if let Some(v) = payload.tfsa {
        inputs.accounts.tfsa = v;
    }
    if let Some(v) = payload.cash_cushion {
        inputs.accounts.cash_cushion = v;
    }

    if let Some(v) = payload.return_sequence_type {
        inputs.return_sequence_type = v;
    }
    if let Some(v) = payload.average_return {
        inputs.annual_growth_rate.average = v;
    }
    if let Some(v) = payload.min_return {
        inputs.annual_growth_rate.min = v;
    }
    if let Some(v) = payload.max_return {
        inputs.annual_growth_rate.max = v;
    }
    if let Some(v) = payload.savings_rate {
        inputs.annual_growth_rate.savings = Some(v);
    }
    if let Some(v) = payload.downturn_threshold {
        inputs.annual_growth_rate.downturn_threshold = v;
    }

    if let Some(v) = payload.cpp_start_age {
        inputs.cpp.start_age = v;
    }
    if let Some(v) = payload.cpp_monthly_amount {
        inputs.cpp.monthly_amount = v;
    }
    if let Some(v) = payload.rrsp_withholding_rate {
        inputs.taxes.rrsp_withholding_rate = v;
    }

    if let Some(v) = payload.success_factor {
        inputs.success_factor = v;
    }
    if let Some(v) = payload.total_runs {
        inputs.total_runs = v;
    }
    if let Some(v) = payload.seed {
        inputs.seed = Some(v);
    }

    inputs.validate().map_err(|e| e.to_string())?;
    Ok(inputs)
}

fn default_inputs_for_api() -> Inputs {
    Inputs {
        mode: None,
        retirement_age: 65,
        max_age: 95,
        province_code: "ONT".to_string(),
        desired_spending: 40_000.0,
        annual_tfsa_contribution: 0.0,
        accounts: StartingBalances {
            rrsp: 500_000.0,
            taxable: 300_000.0,
            tfsa: 200_000.0,
            cash_cushion: 0.0,
        },
        annual_growth_rate: GrowthRates {
            average: 0.05,
            min: -0.15,
            max: 0.2,
            savings: None,
            downturn_threshold: -0.1,
        },
        return_sequence_type: "mean".to_string(),
        cpp: PensionIncome {
            start_age: 65,
            monthly_amount: 0.0,
        },
        taxes: WithholdingTaxes {
            rrsp_withholding_rate: 0.3,
        },
        success_factor: 1.0,
        total_runs: 1_000,
        seed: Some(42),
    }
}
