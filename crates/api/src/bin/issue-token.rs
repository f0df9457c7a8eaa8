//! Token issuing utility for Harbor
//!
//! Signs a development identity token with `JWT_SECRET` so the API and the
//! realtime channel can be exercised without the upstream identity service.
//!
//! Usage:
//!   cargo run --bin issue-token -- <role> [adult|minor] [consent] [ttl-hours] [user-id]
//!
//! Examples:
//!   cargo run --bin issue-token -- requester minor consent
//!   cargo run --bin issue-token -- counselor adult
//!
//! Roles: requester, peer_supporter, counselor, moderator, admin

use std::env;

use harbor_api::auth::JwtManager;
use harbor_shared::{AgeBracket, Role};
use uuid::Uuid;

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(role_arg) = args.first() else {
        eprintln!("Usage: issue-token <role> [adult|minor] [consent] [ttl-hours] [user-id]");
        std::process::exit(1);
    };

    let role: Role = role_arg.parse().map_err(anyhow::Error::msg)?;
    let age_bracket = match args.get(1).map(String::as_str) {
        None | Some("adult") => AgeBracket::Adult,
        Some("minor") => AgeBracket::Minor,
        Some(other) => anyhow::bail!("Invalid age bracket: {}", other),
    };
    let consent = matches!(args.get(2).map(String::as_str), Some("consent" | "true" | "yes"));
    let ttl_hours: i64 = match args.get(3) {
        Some(hours) => hours.parse()?,
        None => 24,
    };
    let user_id = match args.get(4) {
        Some(id) => Uuid::parse_str(id)?,
        None => Uuid::new_v4(),
    };

    let secret = env::var("JWT_SECRET").map_err(|_| anyhow::anyhow!("JWT_SECRET must be set"))?;
    if secret.len() < 32 {
        eprintln!("Warning: JWT_SECRET is shorter than 32 characters; the API will refuse it.");
    }

    let token = JwtManager::new(&secret).issue(
        user_id,
        role,
        age_bracket,
        consent,
        time::Duration::hours(ttl_hours),
    )?;

    println!("\n===========================================");
    println!("User ID:  {}", user_id);
    println!("Role:     {}", role);
    println!("Age:      {:?} (consent: {})", age_bracket, consent);
    println!("Expires:  in {} hours", ttl_hours);
    println!("===========================================");
    println!("{}", token);
    println!("===========================================\n");

    println!("Usage:");
    println!("  curl -H 'Authorization: Bearer {}' http://localhost:3000/api/v1/sessions", token);
    println!("  ws://localhost:3000/api/v1/ws?token={}", token);

    Ok(())
}
