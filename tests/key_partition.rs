use chord_ring::{
	client::setup_client,
	core::{DhtError, KvError, NodeServer}
};
use rand::prelude::*;
use tarpc::context;

mod common;
use common::*;

fn bucket_keys(server: &NodeServer) -> Vec<Vec<u8>> {
	server.bucket_snapshot().into_iter().map(|(k, _)| k).collect()
}

/// A joining node pulls exactly the keys of the arc it takes over.
#[tokio::test]
async fn keys_migrate_on_join() -> anyhow::Result<()> {
	let _ = env_logger::builder().is_test(true).try_init();
	let mut rng = StdRng::seed_from_u64(0);

	let n1 = test_node(10, 7411);
	let mut s1 = NodeServer::new(n1.clone(), test_config())?;
	let m1 = s1.start(None).await?;
	s1.stabilize().await;

	// All three keys land on the only node
	let k5 = key_with_digest(&mut rng, 5);
	let k20 = key_with_digest(&mut rng, 20);
	let k45 = key_with_digest(&mut rng, 45);
	s1.put(&k5, b"v5").await?;
	s1.put(&k20, b"v20").await?;
	s1.put(&k45, b"v45").await?;
	assert_eq!(bucket_keys(&s1).len(), 3);

	// Node 40 takes over the arc (10, 40]; only digest 20 moves
	let n2 = test_node(40, 7412);
	let mut s2 = NodeServer::new(n2.clone(), test_config())?;
	let m2 = s2.start(Some(n1.clone())).await?;
	s2.stabilize().await;
	s1.stabilize().await;

	let keys1 = bucket_keys(&s1);
	assert!(keys1.contains(&k5));
	assert!(keys1.contains(&k45));
	assert!(!keys1.contains(&k20));
	assert_eq!(bucket_keys(&s2), vec![k20.clone()]);

	// Every key is still reachable from both nodes
	assert_eq!(s1.get(&k20).await?, b"v20".to_vec());
	assert_eq!(s2.get(&k5).await?, b"v5".to_vec());
	assert_eq!(s2.get(&k45).await?, b"v45".to_vec());

	m1.stop().await?;
	m2.stop().await?;
	Ok(())
}

/// put/get/delete work from any member of the ring, and a deleted key
/// is reported as missing.
#[tokio::test]
async fn put_get_delete_across_the_ring() -> anyhow::Result<()> {
	let _ = env_logger::builder().is_test(true).try_init();
	let mut rng = StdRng::seed_from_u64(1);

	let n10 = test_node(10, 7421);
	let n40 = test_node(40, 7422);

	let mut s10 = NodeServer::new(n10.clone(), test_config())?;
	let m10 = s10.start(None).await?;
	s10.stabilize().await;

	let mut s40 = NodeServer::new(n40.clone(), test_config())?;
	let m40 = s40.start(Some(n10.clone())).await?;
	s40.stabilize().await;
	s10.stabilize().await;
	s40.stabilize().await;

	// k1 belongs to node 40, k2 to node 10
	let k1 = generate_key_in_range(&mut rng, 10, 40);
	let k2 = generate_key_in_range(&mut rng, 40, 10);
	s10.put(&k1, b"v1").await?;
	s40.put(&k2, b"v2").await?;

	assert_eq!(s10.get(&k1).await?, b"v1".to_vec());
	assert_eq!(s40.get(&k1).await?, b"v1".to_vec());
	assert_eq!(s10.get(&k2).await?, b"v2".to_vec());
	assert_eq!(s40.get(&k2).await?, b"v2".to_vec());
	assert!(bucket_keys(&s40).contains(&k1));
	assert!(bucket_keys(&s10).contains(&k2));

	s10.delete(&k1).await?;
	let err = s40.get(&k1).await.unwrap_err();
	assert!(matches!(err, DhtError::Kv(KvError::KeyNotFound)));

	m10.stop().await?;
	m40.stop().await?;
	Ok(())
}

/// A node that provably does not own a key answers with a redirect
/// hint instead of a spurious not-found.
#[tokio::test]
async fn wrong_node_redirects() -> anyhow::Result<()> {
	let _ = env_logger::builder().is_test(true).try_init();
	let mut rng = StdRng::seed_from_u64(2);

	let n10 = test_node(10, 7431);
	let n40 = test_node(40, 7432);

	let mut s10 = NodeServer::new(n10.clone(), test_config())?;
	let m10 = s10.start(None).await?;
	s10.stabilize().await;

	let mut s40 = NodeServer::new(n40.clone(), test_config())?;
	let m40 = s40.start(Some(n10.clone())).await?;
	s40.stabilize().await;
	s10.stabilize().await;

	// digest 20 lies in (10, 40], owned by node 40; ask node 10 for it
	let key = generate_key_in_range(&mut rng, 10, 40);
	let c10 = setup_client(&n10.addr).await?;
	let err = c10
		.get_rpc(context::current(), key.clone())
		.await?
		.unwrap_err();
	match err {
		KvError::WrongNode { hint } => assert_eq!(hint.id, 40),
		other => panic!("expected a redirect, got {:?}", other)
	};

	// the key does not exist anywhere yet, so the owner reports not-found
	let c40 = setup_client(&n40.addr).await?;
	assert_eq!(
		c40.get_rpc(context::current(), key.clone()).await?,
		Err(KvError::KeyNotFound)
	);

	// a mis-routed put is refused with the same hint, storing nothing
	let err = c10
		.put_rpc(context::current(), key.clone(), b"v".to_vec())
		.await?
		.unwrap_err();
	match err {
		KvError::WrongNode { hint } => assert_eq!(hint.id, 40),
		other => panic!("expected a redirect, got {:?}", other)
	};
	assert!(!bucket_keys(&s10).contains(&key));

	// the routed put lands on the owner
	s10.put(&key, b"v").await?;
	assert!(bucket_keys(&s40).contains(&key));
	assert_eq!(s40.get(&key).await?, b"v".to_vec());

	m10.stop().await?;
	m40.stop().await?;
	Ok(())
}

/// A gracefully leaving node hands its bucket to its successor before
/// going away.
#[tokio::test]
async fn graceful_quit_hands_over_keys() -> anyhow::Result<()> {
	let _ = env_logger::builder().is_test(true).try_init();
	let mut rng = StdRng::seed_from_u64(3);

	let n1 = test_node(10, 7441);
	let n2 = test_node(40, 7442);

	let mut s1 = NodeServer::new(n1.clone(), test_config())?;
	let m1 = s1.start(None).await?;
	s1.stabilize().await;

	let mut s2 = NodeServer::new(n2.clone(), test_config())?;
	let m2 = s2.start(Some(n1.clone())).await?;
	s2.stabilize().await;
	s1.stabilize().await;
	s2.stabilize().await;

	// digest 5 lies in (40, 10], owned by node 10
	let key = key_with_digest(&mut rng, 5);
	s2.put(&key, b"v").await?;
	assert!(bucket_keys(&s1).contains(&key));

	// node 10 leaves; its keys move to node 40 before it exits
	s1.leave().await?;
	m1.stop().await?;
	assert!(bucket_keys(&s2).contains(&key));

	assert_eq!(s2.get(&key).await?, b"v".to_vec());

	m2.stop().await?;
	Ok(())
}
