//! Pathfinder Backend - Main Entry Point
//!
//! Starts the web API server for the career co-pilot.

use pathfinder::api::run_server;
use pathfinder::config::AppConfig;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    println!("╔════════════════════════════════════════════════╗");
    println!("║   Pathfinder - Agentic Career Co-Pilot         ║");
    println!("║   Onboarding → Analysis → Learning             ║");
    println!("╚════════════════════════════════════════════════╝");
    println!();

    run_server(AppConfig::from_env()).await
}
