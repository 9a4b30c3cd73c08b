//! Interactive REPL for asking questions against the local pipeline.
//!
//! Launch with `iot-sage repl`. Lines starting with `/` are commands, anything
//! else is sent through the pipeline as a question. Tab completes commands.

use std::sync::Arc;

use rustyline::completion::{Completer, Pair};
use rustyline::config::CompletionType;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{
    Cmd, ConditionalEventHandler, Config, Editor, Event, EventContext, EventHandler, Helper,
    KeyEvent, RepeatCount,
};
use tokio::runtime::Handle;

use crate::pipeline::QueryOrchestrator;
use crate::types::QueryRequest;

/// Available REPL commands.
const COMMANDS: &[(&str, &str)] = &[
    ("/status", "Show store, pool, and inference statistics"),
    ("/config", "Show the effective configuration"),
    ("/clear", "Clear the screen"),
    ("/help", "Show available commands"),
    ("/exit", "Quit the REPL"),
];

/// Example questions offered as completions for an empty line.
const EXAMPLES: &[&str] = &[
    "What is the temperature in the kitchen?",
    "How has bedroom humidity changed over the last 6 hours?",
    "Were there any unusual temperature spikes in the last day?",
    "Should I open a window in the living room?",
];

struct SageHelper;

impl Completer for SageHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let input = &line[..pos];

        if input.is_empty() {
            let examples = EXAMPLES
                .iter()
                .map(|q| Pair {
                    display: q.to_string(),
                    replacement: q.to_string(),
                })
                .collect();
            return Ok((0, examples));
        }

        if input.starts_with('/') && !input.contains(' ') {
            let matches: Vec<Pair> = COMMANDS
                .iter()
                .filter(|(cmd, _)| cmd.starts_with(input))
                .map(|(cmd, desc)| Pair {
                    display: format!("{cmd:<16} {desc}"),
                    replacement: format!("{cmd} "),
                })
                .collect();
            return Ok((0, matches));
        }

        Ok((pos, Vec::new()))
    }
}

impl Hinter for SageHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<String> {
        if pos < line.len() || line.is_empty() {
            return None;
        }
        if line.starts_with('/') && !line.contains(' ') {
            for (cmd, _) in COMMANDS {
                if cmd.starts_with(line) && *cmd != line {
                    return Some(cmd[line.len()..].to_string());
                }
            }
        }
        None
    }
}

impl Highlighter for SageHelper {}
impl Validator for SageHelper {}
impl Helper for SageHelper {}

struct TabCompleteOrAcceptHint;

impl ConditionalEventHandler for TabCompleteOrAcceptHint {
    fn handle(
        &self,
        _evt: &Event,
        _n: RepeatCount,
        _positive: bool,
        ctx: &EventContext<'_>,
    ) -> Option<Cmd> {
        if ctx.has_hint() {
            Some(Cmd::CompleteHint)
        } else {
            Some(Cmd::Complete)
        }
    }
}

/// Run the REPL on the current thread, driving async calls through `runtime`.
///
/// Must not be called from inside an async task; use `spawn_blocking`.
pub fn run(orchestrator: Arc<QueryOrchestrator>, runtime: Handle) -> anyhow::Result<()> {
    eprintln!();
    eprintln!(
        "  \x1b[32m\u{25c9}\x1b[0m \x1b[1miot-sage v{}\x1b[0m \x1b[90m(backend: {})\x1b[0m",
        env!("CARGO_PKG_VERSION"),
        orchestrator.engine().backend_name()
    );
    eprintln!();
    eprintln!(
        "    Ask a question, \x1b[36m/\x1b[0m to browse commands, \x1b[90mTab\x1b[0m to complete, \x1b[90m/exit\x1b[0m to quit."
    );
    eprintln!();

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .completion_type(CompletionType::List)
        .completion_prompt_limit(20)
        .build();

    let mut rl: Editor<SageHelper, rustyline::history::DefaultHistory> =
        Editor::with_config(config)?;
    rl.set_helper(Some(SageHelper));
    rl.bind_sequence(
        KeyEvent::from('\t'),
        EventHandler::Conditional(Box::new(TabCompleteOrAcceptHint)),
    );

    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    let hist_path = std::path::PathBuf::from(&home).join(".iot_sage_history");
    if hist_path.exists() {
        let _ = rl.load_history(&hist_path);
    }

    let prompt = " \x1b[36msage>\x1b[0m ";

    loop {
        match rl.readline(prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let Some(command) = line.strip_prefix('/') else {
                    cmd_ask(&orchestrator, &runtime, line);
                    continue;
                };

                match command.split_whitespace().next().unwrap_or("") {
                    "exit" | "quit" => {
                        eprintln!("  \x1b[90m\u{2728}\x1b[0m Goodbye!");
                        break;
                    }
                    "" | "help" | "h" | "?" => cmd_help(),
                    "clear" | "cls" => eprint!("\x1b[2J\x1b[H"),
                    "status" => cmd_status(&orchestrator, &runtime),
                    "config" => cmd_config(&orchestrator),
                    other => {
                        eprintln!("  Unknown command '/{other}'. Type /help for commands.");
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                eprintln!("  \x1b[90m(Ctrl+C)\x1b[0m Type \x1b[1m/exit\x1b[0m to quit.");
            }
            Err(ReadlineError::Eof) => {
                eprintln!("  \x1b[90m\u{2728}\x1b[0m Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("  Error: {err}");
                break;
            }
        }
    }

    let _ = rl.save_history(&hist_path);

    Ok(())
}

fn cmd_help() {
    eprintln!();
    eprintln!("  Commands:");
    eprintln!();
    for (cmd, desc) in COMMANDS {
        eprintln!("    {cmd:<18} {desc}");
    }
    eprintln!();
    eprintln!("  Anything else is answered as a question, e.g.:");
    for example in EXAMPLES {
        eprintln!("    {example}");
    }
    eprintln!();
}

fn cmd_ask(orchestrator: &QueryOrchestrator, runtime: &Handle, question: &str) {
    match runtime.block_on(orchestrator.handle(QueryRequest::new(question))) {
        Ok(reply) => {
            eprintln!();
            eprintln!("  {}", reply.answer);
            eprintln!(
                "  \x1b[90m{} | {} samples | {} outliers | {} ms{}\x1b[0m",
                reply.task,
                reply.sample_count,
                reply.outlier_count,
                reply.latency_ms,
                if reply.used_mock { " | mock" } else { "" }
            );
            eprintln!();
        }
        Err(e) => eprintln!("  \x1b[31m{}\x1b[0m {e}", e.code()),
    }
}

fn cmd_status(orchestrator: &QueryOrchestrator, runtime: &Handle) {
    match runtime.block_on(orchestrator.status()) {
        Ok(status) => {
            let store = &status.store;
            eprintln!();
            eprintln!("  Backend:   {}{}", status.backend, if status.mock_mode { " (mock)" } else { "" });
            eprintln!("  Samples:   {}", store.total_samples);
            eprintln!("  Devices:   {}", store.devices.join(", "));
            eprintln!("  Locations: {}", store.locations.join(", "));
            for (metric, count) in &store.metric_counts {
                eprintln!("    {metric:<12} {count}");
            }
            if let (Some(first), Some(last)) = (store.first_reading, store.last_reading) {
                eprintln!("  Readings:  {first} .. {last}");
            }
            eprintln!(
                "  Pool:      {} running, {} queued, {} completed, {} rejected",
                status.pool.running, status.pool.queued, status.pool.completed, status.pool.rejected
            );
            eprintln!(
                "  Inference: {} model, {} mock, {} timeouts, {} errors",
                status.inference.model_answers,
                status.inference.mock_answers,
                status.inference.timeouts,
                status.inference.backend_errors
            );
            eprintln!();
        }
        Err(e) => eprintln!("  Cannot read status: {e}"),
    }
}

fn cmd_config(orchestrator: &QueryOrchestrator) {
    match serde_json::to_string_pretty(orchestrator.config()) {
        Ok(json) => {
            eprintln!();
            for line in json.lines() {
                eprintln!("  {line}");
            }
            eprintln!();
        }
        Err(e) => eprintln!("  Cannot render configuration: {e}"),
    }
}
