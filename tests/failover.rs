use chord_ring::core::NodeServer;
use rand::prelude::*;

mod common;
use common::*;

fn successor_ids(server: &NodeServer) -> Vec<u64> {
	server.get_successor_list().into_iter().map(|n| n.id).collect()
}

/// Killing a node ungracefully: the successor list routes around the
/// hole, the dead predecessor is cleared, and lookups for the orphaned
/// arc are answered by the next node clockwise.
#[tokio::test]
async fn successor_list_routes_around_a_crash() -> anyhow::Result<()> {
	let _ = env_logger::builder().is_test(true).try_init();
	let mut rng = StdRng::seed_from_u64(0);

	let n10 = test_node(10, 7511);
	let n25 = test_node(25, 7512);
	let n40 = test_node(40, 7513);
	let n55 = test_node(55, 7514);

	let mut s10 = NodeServer::new(n10.clone(), test_config())?;
	let m10 = s10.start(None).await?;
	s10.stabilize().await;

	let mut s25 = NodeServer::new(n25.clone(), test_config())?;
	let m25 = s25.start(Some(n10.clone())).await?;
	s25.stabilize().await;
	s10.stabilize().await;

	let mut s40 = NodeServer::new(n40.clone(), test_config())?;
	let m40 = s40.start(Some(n10.clone())).await?;
	s40.stabilize().await;

	let mut s55 = NodeServer::new(n55.clone(), test_config())?;
	let m55 = s55.start(Some(n10.clone())).await?;

	// Let the ring converge
	for _ in 0..3 {
		s55.stabilize().await;
		s40.stabilize().await;
		s25.stabilize().await;
		s10.stabilize().await;
	}

	assert_eq!(successor_ids(&s10), vec![25, 40]);
	assert_eq!(successor_ids(&s25), vec![40, 55]);
	assert_eq!(successor_ids(&s40), vec![55, 10]);
	assert_eq!(successor_ids(&s55), vec![10, 25]);
	assert_eq!(s40.get_predecessor().map(|p| p.id), Some(25));

	// Node 25 crashes without handing anything over
	m25.stop().await?;

	// Its successor notices the dead predecessor
	s40.check_predecessor().await;
	assert_eq!(s40.get_predecessor(), None);

	// Node 10 routes around the hole within one stabilize round
	s10.stabilize().await;
	assert_eq!(successor_ids(&s10), vec![40, 55]);
	assert_eq!(s40.get_predecessor().map(|p| p.id), Some(10));

	// The orphaned arc (10, 25] is now answered by node 40
	let owner = s10.find(30, n10.clone()).await?;
	assert_eq!(owner.id, 40);

	let key = key_with_digest(&mut rng, 30);
	s55.put(&key, b"v").await?;
	assert_eq!(s10.get(&key).await?, b"v".to_vec());

	m10.stop().await?;
	m40.stop().await?;
	m55.stop().await?;
	Ok(())
}
