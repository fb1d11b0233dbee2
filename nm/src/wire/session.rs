//! Stdio wire session
//!
//! One JSON object per line in each direction. User messages start turns
//! (or inject into a running one); control messages interrupt, probe
//! status, or heartbeat. The assistant's text and the final result go out
//! as they happen.

use std::collections::VecDeque;
use std::io::Write;
use std::time::Instant;

use eyre::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use crate::llm::Usage;
use crate::session::Session;
use crate::turn::{TurnObserver, TurnStop};

use super::messages::{ControlAction, Inbound, Outbound};

/// Write one outbound message to stdout
fn emit(message: &Outbound) {
    match serde_json::to_string(message) {
        Ok(line) => {
            let mut stdout = std::io::stdout().lock();
            let _ = writeln!(stdout, "{line}");
            let _ = stdout.flush();
        }
        Err(e) => warn!(error = %e, "failed to serialize outbound message"),
    }
}

/// Run the stdio embedding until stdin closes
pub async fn run_stdio(mut session: Session) -> Result<()> {
    let session_id = session.session_id().to_string();
    let injector = session.injector();
    let interrupt = session.interrupt_handle();

    emit(&Outbound::system("init", None, &session_id));

    // Task snapshots go out as they change, independent of turns
    let mut bus_rx = session.bus().subscribe();
    let tasks_session = session_id.clone();
    let bus_task = tokio::spawn(async move {
        while let Ok(event) = bus_rx.recv().await {
            if let crate::events::Event::TasksChanged(tasks) = event {
                let snapshot: Vec<_> = tasks
                    .iter()
                    .map(|t| serde_json::json!({ "id": t.id, "kind": t.kind, "status": t.status }))
                    .collect();
                emit(&Outbound::system(
                    "tasks",
                    Some(serde_json::json!({ "tasks": snapshot })),
                    &tasks_session,
                ));
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending: VecDeque<String> = VecDeque::new();
    let mut eof = false;

    while !eof || !pending.is_empty() {
        let Some(input) = pending.pop_front() else {
            // Idle: wait for the next line
            match lines.next_line().await? {
                Some(line) => {
                    handle_idle_line(&line, &mut pending, &session, &session_id);
                    continue;
                }
                None => break,
            }
        };

        emit(&Outbound::system("turn_accepted", None, &session_id));
        let started = Instant::now();

        let mut observer = wire_observer(&session_id);
        let mut turn = Box::pin(session.run_prompt(&input, &mut observer));

        // Drive the turn while still consuming stdin for interrupts and
        // mid-turn injections
        let outcome = loop {
            tokio::select! {
                result = &mut turn => break result,
                line = lines.next_line(), if !eof => {
                    match line? {
                        Some(line) => {
                            handle_midturn_line(&line, &injector, &interrupt, &session_id).await;
                        }
                        None => eof = true,
                    }
                }
            }
        };
        drop(turn);

        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(result) => {
                let subtype = match result.stop_reason {
                    TurnStop::Cancelled => "cancelled",
                    _ => "success",
                };
                emit(&Outbound::Result {
                    subtype: subtype.to_string(),
                    duration_ms,
                    num_turns: result.num_turns,
                    session_id: session_id.clone(),
                    usage: result.usage,
                    error: None,
                });
            }
            Err(e) => {
                emit(&Outbound::Result {
                    subtype: "error".to_string(),
                    duration_ms,
                    num_turns: 0,
                    session_id: session_id.clone(),
                    usage: Usage::default(),
                    error: Some(e.to_string()),
                });
            }
        }
    }

    bus_task.abort();
    debug!("stdin closed; wire session over");
    Ok(())
}

/// Observer that streams assistant text and tool results onto the wire
fn wire_observer(session_id: &str) -> TurnObserver {
    let assistant_session = session_id.to_string();
    let tool_session = session_id.to_string();
    TurnObserver {
        on_assistant_text: Some(Box::new(move |text| {
            emit(&Outbound::assistant(text, &assistant_session));
        })),
        on_tool_result: Some(Box::new(move |name, outcome| {
            emit(&Outbound::system(
                "tool_result",
                Some(serde_json::json!({
                    "tool": name,
                    "is_error": outcome.is_error,
                    "output": outcome.output,
                })),
                &tool_session,
            ));
        })),
        ..TurnObserver::default()
    }
}

/// A line received while no turn is running
fn handle_idle_line(line: &str, pending: &mut VecDeque<String>, session: &Session, session_id: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    match serde_json::from_str::<Inbound>(line) {
        Ok(Inbound::User { message }) => {
            pending.push_back(message.text());
            emit(&Outbound::system("queued", None, session_id));
        }
        Ok(Inbound::Control { action }) => match action {
            ControlAction::Interrupt => {
                // Nothing to interrupt; acknowledged as a no-op status
                emit(&Outbound::system(
                    "status_response",
                    Some(serde_json::json!({ "running": false })),
                    session_id,
                ));
            }
            ControlAction::Heartbeat => {
                emit(&Outbound::system("heartbeat_ack", None, session_id));
            }
            ControlAction::Status => emit_status(session, false, session_id),
        },
        Err(e) => {
            emit(&Outbound::system(
                "error",
                Some(serde_json::json!({ "message": format!("unparseable input: {e}") })),
                session_id,
            ));
        }
    }
}

/// A line received while a turn is in flight
async fn handle_midturn_line(
    line: &str,
    injector: &crate::turn::InjectionTx,
    interrupt: &crate::session::InterruptHandle,
    session_id: &str,
) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    match serde_json::from_str::<Inbound>(line) {
        Ok(Inbound::User { message }) => {
            if injector.inject(message.text()).await {
                emit(&Outbound::system("injected", None, session_id));
            }
        }
        Ok(Inbound::Control { action }) => match action {
            ControlAction::Interrupt => {
                interrupt.interrupt();
                emit(&Outbound::system("status_response", Some(serde_json::json!({ "running": true, "interrupting": true })), session_id));
            }
            ControlAction::Heartbeat => emit(&Outbound::system("heartbeat_ack", None, session_id)),
            ControlAction::Status => {
                emit(&Outbound::system(
                    "status_response",
                    Some(serde_json::json!({ "running": true })),
                    session_id,
                ));
            }
        },
        Err(e) => {
            emit(&Outbound::system(
                "error",
                Some(serde_json::json!({ "message": format!("unparseable input: {e}") })),
                session_id,
            ));
        }
    }
}

fn emit_status(session: &Session, running: bool, session_id: &str) {
    let tasks = session
        .scheduler()
        .list(None)
        .map(|tasks| {
            tasks
                .iter()
                .map(|t| serde_json::json!({ "id": t.id, "kind": t.kind, "status": t.status }))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    emit(&Outbound::system(
        "status_response",
        Some(serde_json::json!({ "running": running, "tasks": tasks })),
        session_id,
    ));
}
