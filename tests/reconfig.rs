//! Reconfiguration end-to-end scenarios: shard handoff between groups with
//! state carried over, and per-shard dedup across groups.

mod common;

use common::{key_owned_by, start_ctrl, TestGroup};

use shardset::{
    gen_client_id, key_to_shard, ApiRequest, ClientApiStub, Command, ErrCode,
    ShardsetClient, ShardsetError,
};

use tokio::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn handoff_carries_state() -> Result<(), ShardsetError> {
    let ctrl = start_ctrl().await?;
    let mut g1 = TestGroup::start(1, 3, ctrl.local_addr(), None).await?;
    let mut g2 = TestGroup::start(2, 3, ctrl.local_addr(), None).await?;
    ctrl.join(1, g1.peer_addrs());
    ctrl.join(2, g2.peer_addrs());
    g1.wait_for_config(2, Duration::from_secs(5)).await;
    g2.wait_for_config(2, Duration::from_secs(5)).await;

    // write through whichever group owns the key right now
    let config = ctrl.query(None);
    let key = key_owned_by(&config, 1, &[]);
    let all_addrs: Vec<_> = g1
        .api_addrs()
        .into_iter()
        .chain(g2.api_addrs())
        .collect();
    let mut client = ShardsetClient::new(all_addrs, None)?;
    client.put(&key, "v").await?;

    // move the key's shard from group 1 to group 2
    let moved = ctrl.move_shard(key_to_shard(&key), 2);
    g1.wait_for_config(moved.num, Duration::from_secs(5)).await;
    g2.wait_for_config(moved.num, Duration::from_secs(5)).await;

    // the old owner now rejects the key...
    let id = gen_client_id();
    let mut stub =
        ClientApiStub::new_by_connect(id, g1.leader().api_addr()).await?;
    stub.send_req(&ApiRequest {
        client: id,
        req_num: 1,
        cmd: Command::Get { key: key.clone() },
    })
    .await?;
    assert_eq!(stub.recv_reply().await?.err, ErrCode::WrongGroup);

    // ...while the new owner serves the migrated value and appends on top
    assert_eq!(client.get(&key).await?, "v");
    client.append(&key, "w").await?;
    assert_eq!(client.get(&key).await?, "vw");

    g1.kill_all();
    g2.kill_all();
    ctrl.kill();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dedup_suppresses_replay_after_handoff() -> Result<(), ShardsetError> {
    let ctrl = start_ctrl().await?;
    let mut g1 = TestGroup::start(1, 3, ctrl.local_addr(), None).await?;
    let mut g2 = TestGroup::start(2, 3, ctrl.local_addr(), None).await?;
    ctrl.join(1, g1.peer_addrs());
    ctrl.join(2, g2.peer_addrs());
    g1.wait_for_config(2, Duration::from_secs(5)).await;
    g2.wait_for_config(2, Duration::from_secs(5)).await;

    let config = ctrl.query(None);
    let key = key_owned_by(&config, 1, &[]);

    // append once through group 1, remembering the exact request
    let id = gen_client_id();
    let append = ApiRequest {
        client: id,
        req_num: 1,
        cmd: Command::Append {
            key: key.clone(),
            value: "a".into(),
        },
    };
    let mut stub =
        ClientApiStub::new_by_connect(id, g1.leader().api_addr()).await?;
    stub.send_req(&append).await?;
    assert_eq!(stub.recv_reply().await?.err, ErrCode::Ok);

    // hand the shard to group 2; its session table must come along
    let moved = ctrl.move_shard(key_to_shard(&key), 2);
    g1.wait_for_config(moved.num, Duration::from_secs(5)).await;
    g2.wait_for_config(moved.num, Duration::from_secs(5)).await;

    // replaying the append against the new owner must be suppressed by the
    // transferred session
    let mut stub =
        ClientApiStub::new_by_connect(id, g2.leader().api_addr()).await?;
    stub.send_req(&append).await?;
    assert_eq!(stub.recv_reply().await?.err, ErrCode::Ok);

    stub.send_req(&ApiRequest {
        client: id,
        req_num: 2,
        cmd: Command::Get { key: key.clone() },
    })
    .await?;
    let reply = stub.recv_reply().await?;
    assert_eq!(reply.err, ErrCode::Ok);
    assert_eq!(reply.value.as_deref(), Some("a")); // not "aa"

    g1.kill_all();
    g2.kill_all();
    ctrl.kill();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn split_activity_dedups_per_shard() -> Result<(), ShardsetError> {
    let ctrl = start_ctrl().await?;
    let mut g1 = TestGroup::start(1, 3, ctrl.local_addr(), None).await?;
    let mut g2 = TestGroup::start(2, 3, ctrl.local_addr(), None).await?;
    ctrl.join(1, g1.peer_addrs());
    ctrl.join(2, g2.peer_addrs());
    g1.wait_for_config(2, Duration::from_secs(5)).await;
    g2.wait_for_config(2, Duration::from_secs(5)).await;

    let config = ctrl.query(None);
    let key_a = key_owned_by(&config, 1, &[]);
    let key_b = key_owned_by(&config, 2, &[&key_a]);

    // one client interleaves appends across two groups' shards, with each
    // append also delivered twice; per-shard sessions must dedup both sides
    // independently even though req nums interleave
    let id = gen_client_id();
    let mut stub1 =
        ClientApiStub::new_by_connect(id, g1.leader().api_addr()).await?;
    let mut stub2 =
        ClientApiStub::new_by_connect(id, g2.leader().api_addr()).await?;

    let mut req_num = 0;
    for round in 0..2 {
        for (stub, key) in [(&mut stub1, &key_a), (&mut stub2, &key_b)] {
            req_num += 1;
            let append = ApiRequest {
                client: id,
                req_num,
                cmd: Command::Append {
                    key: key.clone(),
                    value: format!("{}", round),
                },
            };
            for _ in 0..2 {
                stub.send_req(&append).await?;
                assert_eq!(stub.recv_reply().await?.err, ErrCode::Ok);
            }
        }
    }

    let all_addrs: Vec<_> = g1
        .api_addrs()
        .into_iter()
        .chain(g2.api_addrs())
        .collect();
    let mut client = ShardsetClient::new(all_addrs, None)?;
    assert_eq!(client.get(&key_a).await?, "01");
    assert_eq!(client.get(&key_b).await?, "01");

    g1.kill_all();
    g2.kill_all();
    ctrl.kill();
    Ok(())
}
