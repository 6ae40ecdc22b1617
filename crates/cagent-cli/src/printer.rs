//! Event rendering for the terminal.

use std::io::Write;

use cagent_core::runtime::Event;

pub struct Printer {
    pub hide_tool_calls: bool,
    pub output_json: bool,
    /// Whether the last thing printed was streamed content (needs a closing
    /// newline before the next block).
    mid_stream: bool,
}

impl Printer {
    pub fn new(hide_tool_calls: bool, output_json: bool) -> Self {
        Self {
            hide_tool_calls,
            output_json,
            mid_stream: false,
        }
    }

    pub fn print(&mut self, event: &Event) {
        if self.output_json {
            // One event per line; rendering flags do not filter the stream.
            if let Ok(line) = serde_json::to_string(event) {
                println!("{line}");
            }
            return;
        }

        match event {
            Event::AgentChoice { content, .. } => {
                print!("{content}");
                let _ = std::io::stdout().flush();
                self.mid_stream = true;
            }
            Event::AgentChoiceReasoning { .. } => {}
            Event::ToolCallConfirmation { tool_call, .. } => {
                self.break_stream();
                println!(
                    "tool `{}` wants to run with {}",
                    tool_call.name, tool_call.arguments
                );
            }
            Event::ToolCall { agent, tool_call } => {
                if !self.hide_tool_calls {
                    self.break_stream();
                    println!("[{agent}] → {}({})", tool_call.name, tool_call.arguments);
                }
            }
            Event::ToolCallResponse { agent, tool_call, response } => {
                if !self.hide_tool_calls {
                    self.break_stream();
                    let preview: String = response.chars().take(200).collect();
                    println!("[{agent}] ← {}: {preview}", tool_call.name);
                }
            }
            Event::Error { agent, message } => {
                self.break_stream();
                eprintln!("[{agent}] error: {message}");
            }
            Event::MaxIterationsReached { agent, max } => {
                self.break_stream();
                println!("[{agent}] reached {max} iterations");
            }
            Event::ElicitationRequest { server_url, server_type, .. } => {
                self.break_stream();
                println!("{server_type} server {server_url} requires authorization");
            }
            Event::Usage { .. } => {}
        }
    }

    pub fn finish(&mut self) {
        self.break_stream();
    }

    fn break_stream(&mut self) {
        if self.mid_stream {
            println!();
            self.mid_stream = false;
        }
    }
}
