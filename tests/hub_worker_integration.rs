//! Drives a real hub worker process's async loop (minus the actual OS
//! process boundary — `hub_worker::run` is awaited in-process here) against
//! a real bus and a mock NMS, exercising the full AP registration and
//! heartbeat-stats round trip the controller's dispatcher tests stop short
//! of: that traffic never reaches the dispatcher, but the protocol on the
//! wire is identical either way.

mod common;

use std::time::Duration;

use tokio::time::timeout;

use hubsim::address::Address;
use hubsim::bus::{Downlink, Uplink};
use hubsim::config::WorkerSettings;
use hubsim::message::Message;

fn worker_settings(nms_url: &str) -> WorkerSettings {
    let settings = common::test_settings(nms_url);
    (&settings).into()
}

#[tokio::test]
async fn ap_registers_and_reports_heartbeat_stats() {
    let nms_url = common::start_mock_nms().await;
    let downlink = Downlink::bind("127.0.0.1:0").await.unwrap();
    let mut uplink = Uplink::bind("127.0.0.1:0").await.unwrap();
    let pub_endpoint = downlink.local_addr().to_string();
    let pull_endpoint = uplink.local_addr().to_string();

    let settings = worker_settings(&nms_url);
    tokio::spawn(hubsim::hub_worker::run(settings, &pub_endpoint, &pull_endpoint, 0, 0));

    let connect_ind = timeout(Duration::from_secs(2), uplink.recv()).await.unwrap().unwrap();
    assert_eq!(connect_ind, Message::HubConnectInd { address: Address::hub(0, 0) });

    // Give the downlink accept loop time to finish registering the
    // worker's subscription before publishing anything addressed to it.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let ap_address = Address::ap(0, 0, 0);
    downlink
        .publish(&Message::ApRegisterReq {
            address: ap_address.clone(),
            auid: "T-ap-test".into(),
            hub_auid: "T-hub-test".into(),
            heartbeat_seconds: 1,
            azimuth_deg: 180,
            hub_lat_deg: 51.5,
            hub_lon_deg: 0.1,
        })
        .await
        .unwrap();

    let register_rsp = timeout(Duration::from_secs(2), uplink.recv()).await.unwrap().unwrap();
    match register_rsp {
        Message::ApRegisterRsp { address, success, .. } => {
            assert_eq!(address, ap_address);
            assert!(success, "AP registration against the mock NMS should succeed");
        }
        other => panic!("expected AP_REGISTER_RSP, got {other:?}"),
    }

    downlink
        .publish(&Message::StartHeartbeatReq { address: ap_address.clone() })
        .await
        .unwrap();

    // heartbeat_seconds=1 means the first beat lands within one period of
    // jitter; wait long enough for at least one to have gone out.
    tokio::time::sleep(Duration::from_millis(1500)).await;

    downlink
        .publish(&Message::HeartbeatStatsReq { address: ap_address.clone(), reset: false })
        .await
        .unwrap();

    let stats_rsp = timeout(Duration::from_secs(2), uplink.recv()).await.unwrap().unwrap();
    match stats_rsp {
        Message::HeartbeatStatsRsp { address, success, failure } => {
            assert_eq!(address, ap_address);
            assert!(success >= 1, "expected at least one heartbeat to have landed");
            assert_eq!(failure, 0);
        }
        other => panic!("expected HEARTBEAT_STATS_RSP, got {other:?}"),
    }
}

/// A hub worker subscribes on exactly its own hub tag; a frame below an
/// unrelated hub never reaches it.
#[tokio::test]
async fn worker_ignores_frames_for_other_hubs() {
    let nms_url = common::start_mock_nms().await;
    let downlink = Downlink::bind("127.0.0.1:0").await.unwrap();
    let mut uplink = Uplink::bind("127.0.0.1:0").await.unwrap();
    let pub_endpoint = downlink.local_addr().to_string();
    let pull_endpoint = uplink.local_addr().to_string();

    let settings = worker_settings(&nms_url);
    tokio::spawn(hubsim::hub_worker::run(settings, &pub_endpoint, &pull_endpoint, 0, 0));

    let connect_ind = timeout(Duration::from_secs(2), uplink.recv()).await.unwrap().unwrap();
    assert_eq!(connect_ind, Message::HubConnectInd { address: Address::hub(0, 0) });
    tokio::time::sleep(Duration::from_millis(100)).await;

    downlink
        .publish(&Message::ApRegisterReq {
            address: Address::ap(0, 1, 0),
            auid: "T-ap-other".into(),
            hub_auid: "T-hub-other".into(),
            heartbeat_seconds: 30,
            azimuth_deg: 0,
            hub_lat_deg: 51.5,
            hub_lon_deg: 0.1,
        })
        .await
        .unwrap();

    let result = timeout(Duration::from_millis(300), uplink.recv()).await;
    assert!(result.is_err(), "frame addressed to a different hub should never be echoed back");
}
