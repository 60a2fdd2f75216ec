use anyhow::anyhow;
use inquire::{CustomUserError, InquireError, Text};

use crate::core::{construct_node, NodeServer};

const COMMANDS: [&str; 9] = [
	"delete",
	"dump",
	"get",
	"help",
	"join",
	"ping",
	"port",
	"put",
	"quit"
];

const HELP: &str = "\
available commands:
  help                 show this message
  quit                 hand keys to the successor and exit
  port                 print the local port
  ping <addr>          probe a node
  get <key>            look up a key on the ring
  put <key> <value>    store a key on the ring
  delete <key>         remove a key from the ring
  dump                 print the local node state
  join <addr>          join the ring reachable through addr";

fn suggest_command(v: &str) -> Result<Vec<String>, CustomUserError> {
	let mut result = Vec::new();
	for command in COMMANDS {
		if !v.is_empty() && command.starts_with(v) {
			result.push(command.to_string());
		}
	}
	Ok(result)
}

fn complete_command(v: &str) -> Result<Option<String>, CustomUserError> {
	let result = suggest_command(v)?;
	let command = if !result.is_empty() {
		Some(result[0].clone() + " ")
	}
	else {
		None
	};
	Ok(command)
}

fn print_state(server: &NodeServer) {
	let state = server.snapshot();
	println!("node: {:x} at {}", state.node.id, state.node.addr);
	match state.predecessor {
		Some(p) => println!("predecessor: {:x} at {}", p.id, p.addr),
		None => println!("predecessor: (none)")
	};
	for (i, succ) in state.successor_list.iter().enumerate() {
		println!("successor {}: {:x} at {}", i, succ.id, succ.addr);
	}
	for (i, finger) in state.finger_table.iter().enumerate() {
		if let Some(f) = finger {
			println!("finger {}: {:x} at {}", i, f.id, f.addr);
		}
	}
	let mut bucket = server.bucket_snapshot();
	bucket.sort();
	for (key, value) in bucket {
		println!("bucket: {} -> {}", String::from_utf8_lossy(&key), value);
	}
}

// Returns whether the user asked to quit
async fn execute_command(server: &mut NodeServer, command: &str) -> anyhow::Result<bool> {
	let words: Vec<_> = command.split_whitespace().collect();
	if words.is_empty() {
		return Err(anyhow!("invalid command"));
	}

	match words[0] {
		"help" => println!("{}", HELP),
		"quit" => return Ok(true),
		"port" => {
			let addr = &server.local_node().addr;
			println!("{}", addr.rsplit(':').next().unwrap_or(addr));
		},
		"ping" => {
			if words.len() != 2 {
				return Err(anyhow!("usage: ping <addr>"));
			}
			if server.ping_addr(words[1]).await {
				println!("{}: pong", words[1]);
			} else {
				println!("{}: unreachable", words[1]);
			}
		},
		"get" => {
			if words.len() != 2 {
				return Err(anyhow!("usage: get <key>"));
			}
			let value = server.get(words[1].as_bytes()).await?;
			println!("{}", String::from_utf8_lossy(&value));
		},
		"put" => {
			if words.len() != 3 {
				return Err(anyhow!("usage: put <key> <value>"));
			}
			server.put(words[1].as_bytes(), words[2].as_bytes()).await?;
		},
		"delete" => {
			if words.len() != 2 {
				return Err(anyhow!("usage: delete <key>"));
			}
			server.delete(words[1].as_bytes()).await?;
		},
		"dump" => print_state(server),
		"join" => {
			if words.len() != 2 {
				return Err(anyhow!("usage: join <addr>"));
			}
			let peer = construct_node(words[1], server.ring_bits());
			server.join(&peer).await?;
		},
		_ => {
			return Err(anyhow!("unknown command, type 'help' for available commands"));
		}
	};
	Ok(false)
}

/// Interactive command loop; returns when the user quits or closes stdin.
pub async fn run(server: &mut NodeServer) -> anyhow::Result<()> {
	loop {
		let command = match Text::new("")
			.with_suggester(&suggest_command)
			.with_completer(&complete_command)
			.prompt()
		{
			Ok(line) => line,
			Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => break,
			Err(e) => return Err(e.into())
		};

		match execute_command(server, &command).await {
			Ok(true) => break,
			Ok(false) => (),
			Err(e) => println!("Error: {}", e)
		};
	}
	Ok(())
}
