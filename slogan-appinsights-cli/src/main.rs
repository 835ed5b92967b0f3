//! Sends the lines typed on stdin to Application Insights.
//!
//! The connection string is read from `APPLICATIONINSIGHTS_CONNECTION_STRING`.
//! Items are written to stdout as JSON envelopes instead of being sent over
//! the network. Set `APPLICATIONINSIGHTS_DIAGNOSTICS` to print the
//! diagnostics of the handler as well.

use slogan_appinsights::{
    enable_diagnostics, BatchClient, Handler, HandlerOptions, LogBridge, StdoutTransport,
    APPLICATIONINSIGHTS_CONNECTION_STRING,
};
use std::env;
use std::io::{self, BufRead};
use std::process::ExitCode;

const APPLICATIONINSIGHTS_DIAGNOSTICS: &str = "APPLICATIONINSIGHTS_DIAGNOSTICS";

fn main() -> ExitCode {
    let connection_string = env::var(APPLICATIONINSIGHTS_CONNECTION_STRING).unwrap_or_default();
    let connection_string = connection_string.trim();
    if connection_string.is_empty() {
        eprintln!(
            "Error: Environment variable {APPLICATIONINSIGHTS_CONNECTION_STRING} is not defined."
        );
        return ExitCode::FAILURE;
    }

    if env::var_os(APPLICATIONINSIGHTS_DIAGNOSTICS).is_some() {
        enable_diagnostics();
    }

    let handler = match Handler::new(
        connection_string,
        HandlerOptions::from_env(),
        BatchClient::builder(StdoutTransport::default()),
    ) {
        Ok(handler) => handler,
        Err(err) => {
            eprintln!("Error: Failed to create log handler: {err}.");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = log::set_boxed_logger(Box::new(LogBridge::new(handler.clone()))) {
        eprintln!("Error: Failed to install the logger: {err}.");
        return ExitCode::FAILURE;
    }
    log::set_max_level(log::LevelFilter::Trace);

    println!("This program prints the lines you type as Application Insights telemetry.");
    println!("If you enter a blank line, the program will terminate normally.");

    for line in io::stdin().lock().lines() {
        match line {
            Ok(line) if line.is_empty() => break,
            Ok(line) => log::info!("{line}"),
            Err(err) => {
                eprintln!("Error: Failed to read input: {err}.");
                break;
            }
        }
    }

    if !handler.close() {
        eprintln!("Warning: Some log records may not have been delivered.");
    }
    ExitCode::SUCCESS
}
