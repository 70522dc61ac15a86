use commandpost_lib::oauth::browser::{BrowserOpener, SystemBrowser};
use commandpost_lib::{AppContext, AppError, AppResult, Environment};
use std::process::ExitCode;

const USAGE: &str =
    "usage: commandpost <envs | history | login <environment> | refresh <environment>>";

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() || matches!(args[0].as_str(), "-h" | "--help" | "help") {
        eprintln!("{USAGE}");
        return if args.is_empty() {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        };
    }

    let data_dir = match commandpost_lib::app_data_dir() {
        Ok(dir) => dir,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    let _log_guard = match commandpost_lib::init_logging(&data_dir) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());
        tracing::error!(location = %location, "PANIC: commandpost panicked at {location}");
    }));

    let ctx = match AppContext::start(&data_dir).await {
        Ok(ctx) => ctx,
        Err(err) => {
            tracing::error!("startup failed: {err}");
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let result = run(&ctx, &args).await;
    if let Err(err) = ctx.shutdown().await {
        tracing::warn!("write queue shutdown failed: {err}");
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(ctx: &AppContext, args: &[String]) -> AppResult<()> {
    match args.first().map(String::as_str) {
        Some("envs") => list_environments(ctx).await,
        Some("history") => list_history(ctx).await,
        Some("login") => login(ctx, environment_arg(ctx, args).await?).await,
        Some("refresh") => {
            let env = environment_arg(ctx, args).await?;
            let env = commandpost_lib::environment_refresh_token(ctx, env).await?;
            println!("{}: token refreshed{}", env.name, expiry_suffix(&env));
            Ok(())
        }
        _ => Err(format!("SEC_INVALID_INPUT: {USAGE}").into()),
    }
}

async fn environment_arg(ctx: &AppContext, args: &[String]) -> AppResult<Environment> {
    let name = args
        .get(1)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::new("SEC_INVALID_INPUT", USAGE))?;
    commandpost_lib::get_environment(ctx.db(), name)
        .await?
        .ok_or_else(|| AppError::new("SEC_INVALID_INPUT", format!("unknown environment: {name}")))
}

async fn list_environments(ctx: &AppContext) -> AppResult<()> {
    for env in commandpost_lib::get_environments(ctx.db()).await? {
        let token = if env.access_token.is_empty() {
            "no token".to_string()
        } else {
            format!("token{}", expiry_suffix(&env))
        };
        println!("{}\t{}\t{}", env.name, env.base_url, token);
    }
    Ok(())
}

async fn list_history(ctx: &AppContext) -> AppResult<()> {
    for record in commandpost_lib::load_recent_history(ctx).await? {
        let status = record
            .decode_response()
            .map(|r| r.status_code.to_string())
            .unwrap_or_else(|_| "?".to_string());
        match record.decode_request() {
            Ok(req) => println!("{}\t{}\t{} {}\t{}", record.id, record.timestamp, req.method, req.url, status),
            Err(err) => tracing::warn!(id = record.id, "history entry unreadable: {err}"),
        }
    }
    Ok(())
}

async fn login(ctx: &AppContext, env: Environment) -> AppResult<()> {
    let browser = |url: &str| {
        eprintln!("Open this URL to authorize:\n{url}");
        SystemBrowser.open(url);
    };

    let env = tokio::select! {
        result = commandpost_lib::environment_oauth_login(ctx, env, &browser) => result?,
        _ = tokio::signal::ctrl_c() => {
            return Err(AppError::new("OAUTH_CANCELLED", "login interrupted"));
        }
    };
    println!("{}: logged in{}", env.name, expiry_suffix(&env));
    Ok(())
}

fn expiry_suffix(env: &Environment) -> String {
    if env.expires_at.is_empty() {
        String::new()
    } else {
        format!(" (expires {})", env.expires_at)
    }
}
