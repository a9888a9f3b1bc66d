//! End-to-end scenarios over the full pipeline: in-memory cache, channel
//! gateway and scripted application-server/controller mocks. Each test
//! drives `handle_rx_packet` exactly as the server loop would.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use lorans::backend::application::{ErrorType, GetDataDownResponse, JoinRequestResponse};
use lorans::backend::gateway::{ChannelGateway, RxInfo, RxPacket, TxPacket};
use lorans::backend::mock::{MockApplicationServer, MockNetworkController};
use lorans::band;
use lorans::config::ServerConfigBuilder;
use lorans::lorawan::maccommands::{LinkAdrReqPayload, MacCommand};
use lorans::lorawan::phy::encrypt_join_accept;
use lorans::lorawan::{
    Aes128Key, DevAddr, Eui64, FCtrl, Fhdr, JoinAcceptPayload, JoinRequestPayload, MType,
    MacPayload, Mhdr, NetId, Payload, PhyPayload,
};
use lorans::maccommand::queue::{self, QueueItem};
use lorans::server::Context;
use lorans::storage::session::{self, NodeSession, RxWindow};
use lorans::storage::MemoryCache;
use lorans::uplink;

const COLLECTION_WINDOW_MS: u64 = 50;

struct Harness {
    ctx: Arc<Context>,
    app: Arc<MockApplicationServer>,
    #[allow(dead_code)]
    controller: Arc<MockNetworkController>,
    downlinks: mpsc::UnboundedReceiver<TxPacket>,
}

fn harness() -> Harness {
    let config = ServerConfigBuilder::new()
        .net_id(NetId::from_bytes([0, 0, 0x0a]))
        .band("EU868")
        .deduplication_window(Duration::from_millis(COLLECTION_WINDOW_MS))
        .build();
    let (gateway, downlinks) = ChannelGateway::new();
    let app = Arc::new(MockApplicationServer::new());
    let controller = Arc::new(MockNetworkController::new());
    let ctx = Arc::new(Context {
        cache: Arc::new(MemoryCache::new()),
        gateway: Arc::new(gateway),
        application: app.clone(),
        controller: controller.clone(),
        band: band::eu868(),
        net_id: config.net_id,
        config,
    });
    Harness {
        ctx,
        app,
        controller,
        downlinks,
    }
}

fn nwk_s_key() -> Aes128Key {
    "00112233445566778899aabbccddeeff".parse().unwrap()
}

fn app_key() -> Aes128Key {
    "2b7e151628aed2a6abf7158809cf4f3c".parse().unwrap()
}

fn dev_eui() -> Eui64 {
    "0203040506070809".parse().unwrap()
}

fn app_eui() -> Eui64 {
    "0102030405060708".parse().unwrap()
}

fn base_session() -> NodeSession {
    NodeSession {
        dev_addr: DevAddr::from_u32(0x1400_0001),
        app_eui: app_eui(),
        dev_eui: dev_eui(),
        nwk_s_key: nwk_s_key(),
        f_cnt_up: 0,
        f_cnt_down: 0,
        relax_f_cnt: false,
        rx_window: RxWindow::Rx1,
        rx_delay: 0,
        rx1_dr_offset: 0,
        rx2_dr: 0,
        cf_list: vec![],
        adr_interval: 0,
        installation_margin: 10.0,
        last_rx_info_set: vec![],
    }
}

fn rx_info(gw: u8, snr: f64, timestamp: u32) -> RxInfo {
    RxInfo {
        mac: Eui64::from_bytes([gw; 8]),
        timestamp,
        frequency: 868_100_000,
        data_rate: *band::eu868().data_rate(5).unwrap(), // SF7BW125
        code_rate: "4/5".to_string(),
        rssi: -60 - gw as i32,
        lora_snr: snr,
        crc_status: 1,
    }
}

fn data_up(
    ns: &NodeSession,
    mtype: MType,
    f_cnt: u32,
    f_port: Option<u8>,
    frm_payload: Vec<u8>,
) -> Vec<u8> {
    let mut phy = PhyPayload {
        mhdr: Mhdr::new(mtype),
        payload: Payload::Mac(MacPayload {
            fhdr: Fhdr {
                dev_addr: ns.dev_addr,
                f_ctrl: FCtrl::default(),
                f_cnt,
                f_opts: vec![],
            },
            f_port,
            frm_payload,
        }),
        mic: [0; 4],
    };
    phy.set_mic(&ns.nwk_s_key).unwrap();
    phy.serialize().unwrap()
}

async fn save(h: &Harness, ns: &NodeSession) {
    session::save_node_session(h.ctx.cache.as_ref(), ns, Duration::ZERO)
        .await
        .unwrap();
}

async fn stored(h: &Harness) -> NodeSession {
    session::get_node_session(h.ctx.cache.as_ref(), dev_eui())
        .await
        .unwrap()
}

/// Scenario: OTAA join installs a fresh session and schedules the
/// JoinAccept at RX1 timing on the originating gateway.
#[tokio::test]
async fn join_installs_session_and_schedules_join_accept() {
    let mut h = harness();

    let mut jr = PhyPayload {
        mhdr: Mhdr::new(MType::JoinRequest),
        payload: Payload::JoinRequest(JoinRequestPayload {
            app_eui: app_eui(),
            dev_eui: dev_eui(),
            dev_nonce: 0xabcd,
        }),
        mic: [0; 4],
    };
    jr.set_mic(&app_key()).unwrap();
    let jr_bytes = jr.serialize().unwrap();

    // the application server answers with an AppKey-encrypted JoinAccept
    let mut ja = PhyPayload {
        mhdr: Mhdr::new(MType::JoinAccept),
        payload: Payload::JoinAccept(JoinAcceptPayload {
            app_nonce: [1, 2, 3],
            net_id: NetId::from_bytes([0, 0, 0x0a]),
            dev_addr: DevAddr::from_u32(0x1400_0001),
            rx1_dr_offset: 0,
            rx2_dr: 0,
            rx_delay: 0,
            cf_list: None,
        }),
        mic: [0; 4],
    };
    ja.set_mic(&app_key()).unwrap();
    let ja_bytes = encrypt_join_accept(&ja, &app_key()).unwrap();

    h.app
        .set_join_response(Ok(JoinRequestResponse {
            phy_payload: ja_bytes.clone(),
            nwk_s_key: nwk_s_key(),
            rx_delay: 0,
            rx1_dr_offset: 0,
            rx2_dr: 0,
            rx_window: RxWindow::Rx1,
            cf_list: vec![],
            relax_fcnt: false,
            disable_f_cnt_check: false,
            adr_interval: 0,
            installation_margin: 10.0,
        }))
        .await;

    uplink::handle_rx_packet(
        &h.ctx,
        RxPacket {
            rx_info: rx_info(1, 5.0, 1_000_000),
            phy_payload: jr_bytes,
        },
    )
    .await
    .unwrap();

    // fresh session installed with zeroed counters and the returned key
    let ns = stored(&h).await;
    assert_eq!(ns.f_cnt_up, 0);
    assert_eq!(ns.f_cnt_down, 0);
    assert_eq!(ns.nwk_s_key, nwk_s_key());
    assert_eq!(ns.app_eui, app_eui());
    assert_eq!(ns.dev_addr.to_u32() >> 25, 0x0a, "NwkID prefix");
    assert_eq!(ns.last_rx_info_set.len(), 1);

    // the proposed DevAddr went to the application server
    let join_reqs = h.app.take_join_requests().await;
    assert_eq!(join_reqs.len(), 1);
    assert_eq!(join_reqs[0].dev_addr, ns.dev_addr);
    assert_eq!(join_reqs[0].net_id, NetId::from_bytes([0, 0, 0x0a]));

    // JoinAccept scheduled verbatim at rx.timestamp + JoinAcceptDelay1
    let tx = h.downlinks.try_recv().unwrap();
    assert_eq!(tx.phy_payload, ja_bytes);
    assert_eq!(tx.tx_info.mac, Eui64::from_bytes([1; 8]));
    assert_eq!(tx.tx_info.timestamp, 1_000_000 + 5_000_000);
    assert_eq!(tx.tx_info.frequency, 868_100_000);
    assert_eq!(tx.tx_info.data_rate, *band::eu868().data_rate(5).unwrap());
}

/// Scenario: a confirmed uplink with nothing queued still earns an
/// unconfirmed ACK downlink, and both counters advance correctly.
#[tokio::test]
async fn confirmed_uplink_gets_ack_downlink() {
    let mut h = harness();
    let mut ns = base_session();
    ns.f_cnt_up = 9;
    ns.f_cnt_down = 5;
    save(&h, &ns).await;

    let raw = data_up(
        &ns,
        MType::ConfirmedDataUp,
        10,
        Some(2),
        vec![0xde, 0xad, 0xbe, 0xef],
    );
    uplink::handle_rx_packet(
        &h.ctx,
        RxPacket {
            rx_info: rx_info(1, 7.0, 2_000_000),
            phy_payload: raw,
        },
    )
    .await
    .unwrap();

    // ciphertext forwarded to the application server
    let ups = h.app.take_data_up().await;
    assert_eq!(ups.len(), 1);
    assert_eq!(ups[0].f_cnt, 10);
    assert_eq!(ups[0].f_port, 2);
    assert_eq!(ups[0].data, vec![0xde, 0xad, 0xbe, 0xef]);
    assert_eq!(ups[0].gateway_count, 1);

    // the downlink queue was polled for the counter about to be used
    let polls = h.app.take_data_down_requests().await;
    assert_eq!(polls.len(), 1);
    assert_eq!(polls[0].f_cnt, 5);

    // ACK downlink: unconfirmed, FCnt 5, empty body
    let tx = h.downlinks.try_recv().unwrap();
    let phy = PhyPayload::parse(&tx.phy_payload).unwrap();
    assert_eq!(phy.mhdr.mtype, MType::UnconfirmedDataDown);
    let mac = phy.mac_payload().unwrap();
    assert!(mac.fhdr.f_ctrl.ack);
    assert_eq!(mac.fhdr.f_cnt, 5);
    assert_eq!(mac.f_port, None);
    assert!(mac.frm_payload.is_empty());
    assert!(mac.fhdr.f_opts.is_empty());
    assert!(phy.verify_mic(&nwk_s_key()));

    // RX1: one second after the uplink
    assert_eq!(tx.tx_info.timestamp, 2_000_000 + 1_000_000);

    let after = stored(&h).await;
    assert_eq!(after.f_cnt_up, 10);
    assert_eq!(after.f_cnt_down, 6);
}

/// Scenario: queued MAC commands piggyback in FOpts next to application
/// data, and are deleted once transmitted.
#[tokio::test]
async fn downlink_piggybacks_mac_commands_with_app_data() {
    let mut h = harness();
    let mut ns = base_session();
    ns.f_cnt_up = 2;
    ns.f_cnt_down = 7;
    save(&h, &ns).await;

    let dev_status = MacCommand::DevStatusReq;
    let link_adr = MacCommand::LinkAdrReq(LinkAdrReqPayload {
        data_rate: 5,
        tx_power: 1,
        ch_mask: 0x0007,
        ch_mask_cntl: 0,
        nb_rep: 1,
    });
    for command in [&dev_status, &link_adr] {
        queue::enqueue(
            h.ctx.cache.as_ref(),
            dev_eui(),
            &QueueItem {
                data: command.to_bytes(),
                frm_payload: false,
                external: true,
            },
            Duration::ZERO,
        )
        .await
        .unwrap();
    }

    h.app
        .push_data_down(Some(GetDataDownResponse {
            data: vec![9, 8, 7, 6],
            confirmed: false,
            more_data: false,
            f_port: 1,
        }))
        .await;

    let raw = data_up(&ns, MType::UnconfirmedDataUp, 3, Some(2), vec![0x01]);
    uplink::handle_rx_packet(
        &h.ctx,
        RxPacket {
            rx_info: rx_info(1, 7.0, 3_000_000),
            phy_payload: raw,
        },
    )
    .await
    .unwrap();

    let tx = h.downlinks.try_recv().unwrap();
    let phy = PhyPayload::parse(&tx.phy_payload).unwrap();
    assert_eq!(phy.mhdr.mtype, MType::UnconfirmedDataDown);
    let mac = phy.mac_payload().unwrap();

    // both commands in FOpts, app data in the FRMPayload
    let mut expected_f_opts = dev_status.to_bytes();
    expected_f_opts.extend(link_adr.to_bytes());
    assert_eq!(mac.fhdr.f_opts, expected_f_opts);
    assert_eq!(mac.f_port, Some(1));
    assert_eq!(mac.frm_payload, vec![9, 8, 7, 6]);
    assert!(!mac.fhdr.f_ctrl.ack);
    assert!(!mac.fhdr.f_ctrl.f_pending);
    assert_eq!(mac.fhdr.f_cnt, 7);

    // transmitted items are gone from the queue
    let left = queue::read_queue(h.ctx.cache.as_ref(), dev_eui()).await.unwrap();
    assert!(left.is_empty());

    let after = stored(&h).await;
    assert_eq!(after.f_cnt_down, 8);
}

/// Scenario: a queue head marked for FRMPayload goes out encrypted under
/// FPort 0 when no application data competes for it.
#[tokio::test]
async fn encrypted_mac_commands_ride_frm_payload() {
    let mut h = harness();
    let ns = base_session();
    save(&h, &ns).await;

    let link_adr = MacCommand::LinkAdrReq(LinkAdrReqPayload {
        data_rate: 3,
        tx_power: 2,
        ch_mask: 0x0007,
        ch_mask_cntl: 0,
        nb_rep: 2,
    });
    queue::enqueue(
        h.ctx.cache.as_ref(),
        dev_eui(),
        &QueueItem {
            data: link_adr.to_bytes(),
            frm_payload: true,
            external: true,
        },
        Duration::ZERO,
    )
    .await
    .unwrap();

    let raw = data_up(&ns, MType::UnconfirmedDataUp, 1, None, vec![]);
    uplink::handle_rx_packet(
        &h.ctx,
        RxPacket {
            rx_info: rx_info(1, 7.0, 4_000_000),
            phy_payload: raw,
        },
    )
    .await
    .unwrap();

    let tx = h.downlinks.try_recv().unwrap();
    let mut phy = PhyPayload::parse(&tx.phy_payload).unwrap();
    assert!(phy.verify_mic(&nwk_s_key()));
    {
        let mac = phy.mac_payload().unwrap();
        assert_eq!(mac.f_port, Some(0));
        assert!(mac.fhdr.f_opts.is_empty());
        // the wire payload is ciphertext
        assert_ne!(mac.frm_payload, link_adr.to_bytes());
    }

    phy.decrypt_frm_payload(&nwk_s_key()).unwrap();
    assert_eq!(phy.mac_payload().unwrap().frm_payload, link_adr.to_bytes());
}

/// Scenario: three gateways hear the same frame; the pipeline runs once
/// with the aggregated reception set, best SNR first.
#[tokio::test]
async fn duplicate_uplinks_collapse_to_one_handler_call() {
    let h = harness();
    let ns = base_session();
    save(&h, &ns).await;

    let raw = data_up(&ns, MType::UnconfirmedDataUp, 1, Some(2), vec![0x42]);
    let packets = [
        RxPacket {
            rx_info: rx_info(1, 1.0, 5_000_000),
            phy_payload: raw.clone(),
        },
        RxPacket {
            rx_info: rx_info(2, 9.0, 5_000_100),
            phy_payload: raw.clone(),
        },
        RxPacket {
            rx_info: rx_info(3, 5.0, 5_000_200),
            phy_payload: raw.clone(),
        },
    ];
    let [p1, p2, p3] = packets;
    let (r1, r2, r3) = tokio::join!(
        uplink::handle_rx_packet(&h.ctx, p1),
        uplink::handle_rx_packet(&h.ctx, p2),
        uplink::handle_rx_packet(&h.ctx, p3),
    );
    r1.unwrap();
    r2.unwrap();
    r3.unwrap();

    // exactly one application delivery, carrying all three receptions
    let ups = h.app.take_data_up().await;
    assert_eq!(ups.len(), 1);
    assert_eq!(ups[0].gateway_count, 3);

    let after = stored(&h).await;
    assert_eq!(after.last_rx_info_set.len(), 3);
    // best SNR gateway leads the set
    assert_eq!(after.last_rx_info_set[0].mac, Eui64::from_bytes([2; 8]));
    assert!(after.last_rx_info_set[0].lora_snr >= after.last_rx_info_set[1].lora_snr);
    assert!(after.last_rx_info_set[1].lora_snr >= after.last_rx_info_set[2].lora_snr);
}

/// Scenario: a replayed frame counter is rejected, the session stays
/// untouched and the application server is told.
#[tokio::test]
async fn replayed_frame_counter_is_rejected() {
    let mut h = harness();
    let mut ns = base_session();
    ns.f_cnt_up = 7;
    ns.f_cnt_down = 3;
    save(&h, &ns).await;

    let raw = data_up(&ns, MType::UnconfirmedDataUp, 7, Some(2), vec![0x42]);
    uplink::handle_rx_packet(
        &h.ctx,
        RxPacket {
            rx_info: rx_info(1, 7.0, 6_000_000),
            phy_payload: raw,
        },
    )
    .await
    .unwrap();

    // nothing forwarded, nothing transmitted, nothing changed
    assert!(h.app.take_data_up().await.is_empty());
    assert!(h.downlinks.try_recv().is_err());
    let after = stored(&h).await;
    assert_eq!(after.f_cnt_up, 7);
    assert_eq!(after.f_cnt_down, 3);

    // but the application server was notified of the replay
    let errors = h.app.take_errors().await;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error_type, ErrorType::DataUp);
    assert!(errors[0].error.contains("replay"), "{}", errors[0].error);
}

/// RelaxFCnt: a device that reboots and restarts its counters at zero is
/// accepted and both server-side counters reset.
#[tokio::test]
async fn relax_fcnt_accepts_counter_reset() {
    let h = harness();
    let mut ns = base_session();
    ns.f_cnt_up = 1000;
    ns.f_cnt_down = 50;
    ns.relax_f_cnt = true;
    save(&h, &ns).await;

    let raw = data_up(&ns, MType::UnconfirmedDataUp, 0, Some(2), vec![0x42]);
    uplink::handle_rx_packet(
        &h.ctx,
        RxPacket {
            rx_info: rx_info(1, 7.0, 7_000_000),
            phy_payload: raw,
        },
    )
    .await
    .unwrap();

    let ups = h.app.take_data_up().await;
    assert_eq!(ups.len(), 1);
    assert_eq!(ups[0].f_cnt, 0);

    let after = stored(&h).await;
    assert_eq!(after.f_cnt_up, 0);
    assert_eq!(after.f_cnt_down, 0);
}

/// An unknown DevAddr (or wrong key) is dropped without notifying anyone.
#[tokio::test]
async fn unknown_session_is_dropped_silently() {
    let mut h = harness();
    // no session saved at all
    let ghost = base_session();
    let raw = data_up(&ghost, MType::UnconfirmedDataUp, 1, Some(2), vec![0x42]);
    uplink::handle_rx_packet(
        &h.ctx,
        RxPacket {
            rx_info: rx_info(1, 7.0, 8_000_000),
            phy_payload: raw,
        },
    )
    .await
    .unwrap();

    assert!(h.app.take_data_up().await.is_empty());
    assert!(h.app.take_errors().await.is_empty());
    assert!(h.downlinks.try_recv().is_err());
}
