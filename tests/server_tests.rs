//! Smoke test for the server loop: gateway events in, scheduled downlink
//! out, clean shutdown when the transport closes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use lorans::backend::gateway::{
    ChannelGateway, GatewayEvent, GatewayStatsPacket, RxInfo, RxPacket,
};
use lorans::backend::mock::{MockApplicationServer, MockNetworkController};
use lorans::band;
use lorans::config::ServerConfigBuilder;
use lorans::lorawan::{
    Aes128Key, DevAddr, Eui64, FCtrl, Fhdr, MType, MacPayload, Mhdr, NetId, Payload, PhyPayload,
};
use lorans::server::{Context, NetworkServer};
use lorans::storage::session::{self, NodeSession, RxWindow};
use lorans::storage::MemoryCache;

#[tokio::test]
async fn server_loop_processes_uplink_end_to_end() {
    let config = ServerConfigBuilder::new()
        .net_id(NetId::from_bytes([0, 0, 0x0a]))
        .deduplication_window(Duration::from_millis(20))
        .build();
    let (gateway, mut downlinks) = ChannelGateway::new();
    let app = Arc::new(MockApplicationServer::new());
    let ctx = Arc::new(Context {
        cache: Arc::new(MemoryCache::new()),
        gateway: Arc::new(gateway),
        application: app.clone(),
        controller: Arc::new(MockNetworkController::new()),
        band: band::eu868(),
        net_id: config.net_id,
        config,
    });

    let nwk_s_key: Aes128Key = "00112233445566778899aabbccddeeff".parse().unwrap();
    let ns = NodeSession {
        dev_addr: DevAddr::from_u32(0x1400_0042),
        app_eui: Eui64::from_bytes([1; 8]),
        dev_eui: Eui64::from_bytes([2; 8]),
        nwk_s_key,
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
    };
    session::save_node_session(ctx.cache.as_ref(), &ns, Duration::ZERO)
        .await
        .unwrap();

    let server = NetworkServer::new(Arc::clone(&ctx));
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let server_task = tokio::spawn(async move { server.run(events_rx).await });

    // stats are accepted alongside frames
    events_tx
        .send(GatewayEvent::Stats(GatewayStatsPacket {
            mac: Eui64::from_bytes([9; 8]),
            rx_packets_received: 10,
            rx_packets_received_ok: 9,
            latitude: None,
            longitude: None,
            altitude: None,
        }))
        .unwrap();

    // a confirmed uplink must come back as an ACK downlink
    let mut phy = PhyPayload {
        mhdr: Mhdr::new(MType::ConfirmedDataUp),
        payload: Payload::Mac(MacPayload {
            fhdr: Fhdr {
                dev_addr: ns.dev_addr,
                f_ctrl: FCtrl::default(),
                f_cnt: 1,
                f_opts: vec![],
            },
            f_port: Some(5),
            frm_payload: vec![0xaa],
        }),
        mic: [0; 4],
    };
    phy.set_mic(&nwk_s_key).unwrap();
    events_tx
        .send(GatewayEvent::Rx(RxPacket {
            rx_info: RxInfo {
                mac: Eui64::from_bytes([9; 8]),
                timestamp: 100_000,
                frequency: 868_300_000,
                data_rate: *band::eu868().data_rate(5).unwrap(),
                code_rate: "4/5".to_string(),
                rssi: -70,
                lora_snr: 6.5,
                crc_status: 1,
            },
            phy_payload: phy.serialize().unwrap(),
        }))
        .unwrap();

    let tx_packet = tokio::time::timeout(Duration::from_secs(2), downlinks.recv())
        .await
        .expect("downlink within the receive window")
        .expect("gateway channel open");

    let down = PhyPayload::parse(&tx_packet.phy_payload).unwrap();
    assert_eq!(down.mhdr.mtype, MType::UnconfirmedDataDown);
    assert!(down.mac_payload().unwrap().fhdr.f_ctrl.ack);
    assert_eq!(tx_packet.tx_info.timestamp, 100_000 + 1_000_000);
    assert_eq!(tx_packet.tx_info.frequency, 868_300_000);

    assert_eq!(app.take_data_up().await.len(), 1);

    // closing the transport stops the loop
    drop(events_tx);
    tokio::time::timeout(Duration::from_secs(2), server_task)
        .await
        .expect("server stops when the event channel closes")
        .unwrap();
}
