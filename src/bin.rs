use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::Parser;

use chord_ring::core::{self, ring, Config, Node};
use chord_ring::shell;

#[derive(Parser)]
#[command(name = "chord-ring", about = "A Chord distributed hash table node")]
struct Args {
	/// Advertised IPv4 address
	#[arg(short = 'a', value_name = "IPV4")]
	addr: Ipv4Addr,

	/// Advertised port
	#[arg(short = 'p', value_name = "PORT")]
	port: u16,

	/// Join-peer IPv4 address (starts a new ring when absent)
	#[arg(long = "ja", value_name = "IPV4", requires = "join_port")]
	join_addr: Option<Ipv4Addr>,

	/// Join-peer port
	#[arg(long = "jp", value_name = "PORT", requires = "join_addr")]
	join_port: Option<u16>,

	/// Stabilize period in milliseconds
	#[arg(long = "ts", value_name = "MS", value_parser = clap::value_parser!(u64).range(1..=60_000))]
	stabilize_interval: u64,

	/// Fix-fingers period in milliseconds
	#[arg(long = "tff", value_name = "MS", value_parser = clap::value_parser!(u64).range(1..=60_000))]
	fix_finger_interval: u64,

	/// Check-predecessor period in milliseconds
	#[arg(long = "tcp", value_name = "MS", value_parser = clap::value_parser!(u64).range(1..=60_000))]
	check_predecessor_interval: u64,

	/// Successor-list length
	#[arg(short = 'r', value_name = "N", value_parser = clap::value_parser!(u64).range(1..=32))]
	successors: u64,

	/// Pre-set node id (hex, up to 40 chars)
	#[arg(short = 'i', value_name = "HEX")]
	id: Option<String>,

	/// Store values as files under this directory instead of in memory
	#[arg(long = "dir", value_name = "PATH")]
	dir: Option<PathBuf>
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	env_logger::init();
	let args = Args::parse();

	let config = Config {
		successors: args.successors as usize,
		stabilize_interval: args.stabilize_interval,
		fix_finger_interval: args.fix_finger_interval,
		check_predecessor_interval: args.check_predecessor_interval,
		// peers slower than two stabilize rounds count as dead
		rpc_timeout: args.stabilize_interval.saturating_mul(2),
		storage_dir: args.dir,
		..Config::default()
	};

	let addr = format!("{}:{}", args.addr, args.port);
	let node = match args.id.as_ref() {
		Some(hex_id) => Node {
			id: ring::parse_id(hex_id, config.num_bits)?,
			addr
		},
		None => core::construct_node(&addr, config.num_bits)
	};

	let join_node = match (args.join_addr, args.join_port) {
		(Some(ja), Some(jp)) => Some(core::construct_node(&format!("{}:{}", ja, jp), config.num_bits)),
		_ => None
	};

	let mut server = core::NodeServer::new(node, config)?;
	let manager = server.start(join_node).await?;

	shell::run(&mut server).await?;

	// graceful leave: hand the bucket over before tearing the tasks down
	server.leave().await?;
	manager.stop().await
}
