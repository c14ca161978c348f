//! Interactive REPL and one-shot command dispatch.
//!
//! The REPL is the rendering surface: core components never read state
//! from it, they receive explicit arguments and return values or typed
//! errors which are rendered here.

use crate::api::HttpTransport;
use crate::config::Config;
use crate::consent;
use crate::error::ApiError;
use crate::gateway::ToolGateway;
use crate::invite;
use crate::payment::{self, BillingPeriod, OrderMonitor};
use crate::session::{Plan, Registration, SessionManager};
use crate::storage::CredentialStore;
use crate::tools::ToolRequest;
use anyhow::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde_json::Value;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct Context {
    pub config: Config,
    pub transport: HttpTransport,
    pub store: CredentialStore,
    pub session: RefCell<SessionManager>,
    pub gateway: ToolGateway,
    pub monitor: RefCell<OrderMonitor>,
}

pub fn run_once(ctx: &Context, command: &str) -> Result<()> {
    handle_command(ctx, command);
    Ok(())
}

pub fn run_repl(ctx: Context) -> Result<()> {
    let mut rl = DefaultEditor::new()?;

    println!("sellerkit - type /help for commands, /exit to quit");
    if let Some(user) = ctx.session.borrow().user() {
        println!(
            "Logged in as {} ({} plan)",
            user.email,
            user.plan.display_name()
        );
    }
    if consent::current_choice(&ctx.store).is_none() {
        println!("Usage analytics consent not set; use /consent on|off");
    }

    loop {
        match rl.readline(">>> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line)?;

                if line.starts_with('/') {
                    if handle_command(&ctx, line) {
                        break;
                    }
                } else {
                    println!("Commands start with '/'; try /help");
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        }
    }

    // Any active poll dies with the REPL.
    ctx.monitor.borrow_mut().stop();
    Ok(())
}

/// Dispatch one slash command. Returns true when the REPL should exit.
fn handle_command(ctx: &Context, line: &str) -> bool {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some(&command) = parts.first() else {
        return false;
    };
    match command {
        "/exit" | "/quit" => return true,
        "/help" => print_help(),
        "/login" => cmd_login(ctx, &parts[1..]),
        "/register" => cmd_register(ctx, &parts[1..]),
        "/logout" => {
            ctx.session.borrow_mut().logout(&ctx.store);
            println!("Logged out");
        }
        "/whoami" => cmd_whoami(ctx),
        "/profile" => cmd_profile(ctx),
        "/plan" => cmd_plan_info(ctx),
        "/plans" => cmd_plans(ctx),
        "/order" => cmd_order(ctx, &parts[1..]),
        "/paid" => cmd_paid(ctx, &parts[1..]),
        "/invite" => cmd_invite(ctx),
        "/consent" => cmd_consent(ctx, &parts[1..]),
        "/tools" => print_tools(),
        "/removebg" => cmd_image_tool(ctx, &parts[1..], 1, |_| Ok(ToolRequest::RemoveBackground)),
        "/watermark" => cmd_watermark(ctx, line),
        "/removewm" => cmd_image_tool(ctx, &parts[1..], 1, |_| Ok(ToolRequest::RemoveWatermark)),
        "/compress" => cmd_image_tool(ctx, &parts[1..], 3, |args| {
            let quality = parse_int(args[1], "quality")?;
            let max_kb = match args.get(3) {
                Some(raw) => Some(parse_int(raw, "max size")?),
                None => None,
            };
            ToolRequest::compress_image(quality, args[2], max_kb)
        }),
        "/convertimg" => cmd_image_tool(ctx, &parts[1..], 2, |args| {
            let quality = match args.get(2) {
                Some(raw) => parse_int(raw, "quality")?,
                None => 90,
            };
            ToolRequest::convert_format(args[1], quality)
        }),
        "/crop" => cmd_image_tool(ctx, &parts[1..], 2, |args| ToolRequest::crop_image(args[1])),
        "/rotate" => cmd_image_tool(ctx, &parts[1..], 2, |args| ToolRequest::rotate_flip(args[1])),
        "/upscale" => cmd_image_tool(ctx, &parts[1..], 2, |args| {
            ToolRequest::super_resolution(parse_int(args[1], "scale")?)
        }),
        "/keywords" => cmd_keywords(ctx, line),
        "/listing" => cmd_listing(ctx, line),
        "/currency" => cmd_currency(ctx, &parts[1..]),
        "/units" => cmd_units(ctx, &parts[1..]),
        other => println!("Unknown command: {} (try /help)", other),
    }
    false
}

fn print_help() {
    println!("Commands:");
    println!("  /login <email> <password>");
    println!("  /register <email> <password> <confirm> <name> [invite_code]");
    println!("  /logout /whoami /profile /plan");
    println!("  /plans                          - list membership plans");
    println!("  /order <plan> <monthly|yearly>  - create an upgrade order");
    println!("  /paid <order_no>                - claim payment, wait for confirmation");
    println!("  /invite                         - show invite code and stats");
    println!("  /consent [on|off]               - usage analytics consent");
    println!("  /tools                          - list tool commands");
    println!("  /exit");
}

fn print_tools() {
    println!("Tool commands:");
    println!("  /removebg <file>");
    println!("  /watermark <file> <top-left|top-right|bottom-left|bottom-right|center> <text...>");
    println!("  /removewm <file>");
    println!("  /compress <file> <quality 1-100> <jpeg|png|webp> [max_kb]");
    println!("  /convertimg <file> <jpeg|png|webp> [quality]");
    println!("  /crop <file> <preset>");
    println!("  /rotate <file> <rotate_90_cw|rotate_90_ccw|rotate_180|flip_horizontal|flip_vertical>");
    println!("  /upscale <file> <2|4>");
    println!("  /keywords <action> <platform> <product description...>");
    println!("  /listing <platform> <language> <style> <product info...>");
    println!("  /currency <amount> <from> <to>");
    println!("  /units <category> <value> <from> <to>");
}

fn cmd_login(ctx: &Context, args: &[&str]) {
    if args.len() != 2 {
        println!("Usage: /login <email> <password>");
        return;
    }
    let result = ctx
        .session
        .borrow_mut()
        .login(&ctx.transport, &ctx.store, args[0], args[1]);
    match result {
        Ok(()) => {
            let session = ctx.session.borrow();
            if let Some(user) = session.user() {
                println!(
                    "Logged in as {} ({} plan)",
                    user.email,
                    user.plan.display_name()
                );
            }
        }
        Err(e) => report_error(&e),
    }
}

fn cmd_register(ctx: &Context, args: &[&str]) {
    if args.len() < 4 {
        println!("Usage: /register <email> <password> <confirm> <name> [invite_code]");
        return;
    }
    let registration = Registration {
        email: args[0].to_string(),
        password: args[1].to_string(),
        confirm_password: args[2].to_string(),
        name: args[3].to_string(),
        invite_code: args.get(4).map(|s| s.to_string()),
    };
    let result = ctx
        .session
        .borrow_mut()
        .register(&ctx.transport, &ctx.store, &registration);
    match result {
        Ok(()) => println!("Account created, you are now logged in"),
        Err(e) => report_error(&e),
    }
}

fn cmd_whoami(ctx: &Context) {
    let session = ctx.session.borrow();
    match session.user() {
        Some(user) => {
            println!("{} <{}>", user.name, user.email);
            println!("Plan: {}", user.plan.display_name());
            if let Some(stats) = &user.usage_stats {
                if let (Some(used), Some(limit)) = (
                    stats.get("today_usage").and_then(Value::as_i64),
                    stats.get("daily_limit").and_then(Value::as_i64),
                ) {
                    if limit > 0 {
                        println!("Today: {}/{}", used, limit);
                    } else {
                        println!("Today: {} (unlimited)", used);
                    }
                }
            }
        }
        None => println!("Not logged in"),
    }
}

fn cmd_profile(ctx: &Context) {
    let result = ctx
        .session
        .borrow_mut()
        .refresh_profile(&ctx.transport, &ctx.store);
    match result {
        Ok(()) => cmd_whoami(ctx),
        Err(e) => report_error(&e),
    }
}

fn cmd_plan_info(ctx: &Context) {
    let result = ctx
        .session
        .borrow_mut()
        .fetch_plan_info(&ctx.transport, &ctx.store);
    if let Err(e) = result {
        report_error(&e);
        return;
    }
    let session = ctx.session.borrow();
    match session.plan_info() {
        Some(info) => print_json(info),
        None => println!("No plan info available"),
    }
}

fn cmd_plans(ctx: &Context) {
    match payment::fetch_plans(&ctx.transport) {
        Ok(plans) => print_json(&plans),
        Err(e) => report_error(&e),
    }
}

fn cmd_order(ctx: &Context, args: &[&str]) {
    if args.len() != 2 {
        println!("Usage: /order <plan> <monthly|yearly>");
        return;
    }
    let plan = Plan::parse(args[0]);
    if plan == Plan::Free {
        println!("Pick a paid plan: basic, professional, flagship or enterprise");
        return;
    }
    let period = match BillingPeriod::parse(args[1]) {
        Ok(p) => p,
        Err(e) => {
            report_error(&e);
            return;
        }
    };
    let result = payment::create_order(
        &ctx.transport,
        &mut ctx.session.borrow_mut(),
        &ctx.store,
        plan,
        period,
    );
    match result {
        Ok(order) => {
            println!(
                "Order {} created: {} plan, {} {:.2}",
                order.order_no,
                order.plan.display_name(),
                order.billing_period.as_deref().unwrap_or("monthly"),
                order.amount
            );
            println!("After paying, run: /paid {}", order.order_no);
        }
        Err(e) => report_error(&e),
    }
}

fn cmd_paid(ctx: &Context, args: &[&str]) {
    if args.len() != 1 {
        println!("Usage: /paid <order_no>");
        return;
    }
    let interval = Duration::from_secs(ctx.config.poll_interval_secs);
    payment::watch_order(
        &ctx.transport,
        &mut ctx.session.borrow_mut(),
        &ctx.store,
        &mut ctx.monitor.borrow_mut(),
        args[0],
        interval,
    );
}

fn cmd_invite(ctx: &Context) {
    let result = invite::fetch_stats(&ctx.transport, &mut ctx.session.borrow_mut(), &ctx.store);
    match result {
        Ok(stats) => {
            println!("Invite code: {}", stats.invite_code);
            println!("Friends invited: {}", stats.invited_count);
        }
        Err(e) => report_error(&e),
    }
}

fn cmd_consent(ctx: &Context, args: &[&str]) {
    match args.first() {
        None => match consent::current_choice(&ctx.store) {
            Some(true) => println!("Consent: accepted"),
            Some(false) => println!("Consent: declined"),
            None => println!("Consent: not set (use /consent on|off)"),
        },
        Some(&"on") => {
            consent::record_choice(&ctx.store, true);
            println!("Consent recorded");
        }
        Some(&"off") => {
            consent::record_choice(&ctx.store, false);
            println!("Consent declined");
        }
        Some(other) => println!("Usage: /consent [on|off] (got '{}')", other),
    }
}

fn cmd_image_tool<F>(ctx: &Context, args: &[&str], min_args: usize, build: F)
where
    F: FnOnce(&[&str]) -> Result<ToolRequest, ApiError>,
{
    if args.len() < min_args {
        print_tools();
        return;
    }
    match build(args) {
        Ok(request) => run_image_tool(ctx, args[0], &request),
        Err(e) => report_error(&e),
    }
}

fn cmd_watermark(ctx: &Context, line: &str) {
    // watermark text is free form: everything after the position
    let parts: Vec<&str> = line.splitn(4, ' ').collect();
    if parts.len() < 4 {
        println!("Usage: /watermark <file> <position> <watermark text...>");
        return;
    }
    // opacity, font size and color follow the web defaults
    match ToolRequest::add_watermark(parts[3], parts[2], 0.7, 50, "#000000") {
        Ok(request) => run_image_tool(ctx, parts[1], &request),
        Err(e) => report_error(&e),
    }
}

fn run_image_tool(ctx: &Context, path: &str, request: &ToolRequest) {
    let path = PathBuf::from(path);
    let image = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error: cannot read {}: {}", path.display(), e);
            return;
        }
    };
    invoke_and_render(ctx, request, Some((&path, &image)));
}

fn cmd_keywords(ctx: &Context, line: &str) {
    // description is free text: take everything after the third token
    let parts: Vec<&str> = line.splitn(4, ' ').collect();
    if parts.len() < 4 {
        println!("Usage: /keywords <action> <platform> <product description...>");
        return;
    }
    match ToolRequest::analyze_keywords(parts[1], parts[3], parts[2], None) {
        Ok(request) => invoke_and_render(ctx, &request, None),
        Err(e) => report_error(&e),
    }
}

fn cmd_listing(ctx: &Context, line: &str) {
    let parts: Vec<&str> = line.splitn(5, ' ').collect();
    if parts.len() < 5 {
        println!("Usage: /listing <platform> <language> <style> <product info...>");
        return;
    }
    match ToolRequest::generate_listing(parts[4], parts[1], parts[2], parts[3]) {
        Ok(request) => invoke_and_render(ctx, &request, None),
        Err(e) => report_error(&e),
    }
}

fn cmd_currency(ctx: &Context, args: &[&str]) {
    if args.len() != 3 {
        println!("Usage: /currency <amount> <from> <to>");
        return;
    }
    let amount = match args[0].parse::<f64>() {
        Ok(a) => a,
        Err(_) => {
            println!("Amount must be a number, got '{}'", args[0]);
            return;
        }
    };
    match ToolRequest::convert_currency(amount, args[1], args[2]) {
        Ok(request) => invoke_and_render(ctx, &request, None),
        Err(e) => report_error(&e),
    }
}

fn cmd_units(ctx: &Context, args: &[&str]) {
    if args.len() != 4 {
        println!("Usage: /units <category> <value> <from> <to>");
        return;
    }
    let value = match args[1].parse::<f64>() {
        Ok(v) => v,
        Err(_) => {
            println!("Value must be a number, got '{}'", args[1]);
            return;
        }
    };
    match ToolRequest::convert_units(args[0], value, args[2], args[3]) {
        Ok(request) => invoke_and_render(ctx, &request, None),
        Err(e) => report_error(&e),
    }
}

fn invoke_and_render(ctx: &Context, request: &ToolRequest, image: Option<(&Path, &[u8])>) {
    let result = ctx.gateway.invoke(
        &ctx.transport,
        &mut ctx.session.borrow_mut(),
        &ctx.store,
        request,
        image.map(|(_, bytes)| bytes),
    );
    let value = match result {
        Ok(v) => v,
        Err(e) => {
            report_error(&e);
            return;
        }
    };

    if let Some((input_path, _)) = image {
        match extract_image_payload(&value) {
            Some(encoded) => match STANDARD.decode(encoded) {
                Ok(bytes) => {
                    let out = output_path(input_path);
                    match std::fs::write(&out, bytes) {
                        Ok(()) => println!("Saved result to {}", out.display()),
                        Err(e) => eprintln!("Error: cannot write {}: {}", out.display(), e),
                    }
                }
                Err(e) => eprintln!("Error: result image is not valid base64: {}", e),
            },
            None => print_json(&value),
        }
    } else {
        print_json(&value);
    }

    if let Some(remaining) = value.get("remaining_usage").and_then(Value::as_i64) {
        if remaining >= 0 {
            println!("Remaining uses today: {}", remaining);
        }
    }
}

/// The backend names the result field differently per tool.
fn extract_image_payload(value: &Value) -> Option<&str> {
    ["processed_image", "converted_image", "compressed_image", "cropped_image"]
        .iter()
        .find_map(|key| value.get(key).and_then(Value::as_str))
        // strip a data-URL prefix when present
        .map(|s| s.rsplit_once("base64,").map(|(_, b64)| b64).unwrap_or(s))
}

fn output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let ext = input.extension().and_then(|e| e.to_str()).unwrap_or("png");
    input.with_file_name(format!("{}_out.{}", stem, ext))
}

fn parse_int(raw: &str, what: &str) -> Result<i64, ApiError> {
    raw.parse::<i64>()
        .map_err(|_| ApiError::Validation(format!("{} must be a number, got '{}'", what, raw)))
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(pretty) => println!("{}", pretty),
        Err(_) => println!("{}", value),
    }
}

fn report_error(err: &ApiError) {
    eprintln!("Error: {}", err);
    if matches!(err, ApiError::QuotaExceeded(_)) {
        eprintln!("See /plans for an upgrade");
    }
}
