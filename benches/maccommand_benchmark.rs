//! Throughput of MAC-command dispatch (§4.3): every decoded FOpts/FPort-0
//! block an uplink carries passes through `MacCommandEngine::dispatch`.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lorawan_ns_core::mac_engine::{MacCommandEngine, UplinkContext};
use lorawan_ns_core::model::session::{ChannelMask, MacCommandQueue, Rx2Params};
use lorawan_ns_core::model::{
    AdrHistory, AppSKeyRef, Cid, DevAddr, DeviceProfile, DeviceSession, JoinEui, MacCommandBlock,
    MacCommandPayload, SessionKeys,
};
use lorawan_ns_core::model::{AesKey, DevEui, ServiceProfile};

fn sample_session() -> DeviceSession {
    DeviceSession {
        dev_eui: DevEui([1; 8]),
        dev_addr: DevAddr(1),
        join_eui: JoinEui([0; 8]),
        keys: SessionKeys {
            nwk_s_enc_key: AesKey([0; 16]),
            nwk_s_int_key: AesKey([1; 16]),
            app_s_key_ref: AppSKeyRef(1),
            session_key_id: 1,
        },
        lorawan_version_minor: 1,
        uplink_frame_counter: 41,
        downlink_n_frame_counter: 3,
        downlink_a_frame_counter: 0,
        uplink_counter_rollover_tolerance: 16384,
        data_rate_index: 5,
        tx_power_index: 1,
        nb_trans: 1,
        rx1_delay_secs: 1,
        rx1_dr_offset: 0,
        rx2: Rx2Params { data_rate: 0, frequency: 869_525_000 },
        enabled_uplink_channels: ChannelMask::from_indices([0, 1, 2]),
        pending_link_adr: None,
        mac_command_queue: MacCommandQueue::new(16),
        last_link_check: None,
        adr_history: AdrHistory::new(20),
    }
}

fn sample_device_profile() -> DeviceProfile {
    DeviceProfile {
        profile_id: 1,
        supported_lorawan_version_minor: 1,
        default_channel_indices: vec![0, 1, 2],
        default_rx1_delay_secs: 1,
        default_rx1_dr_offset: 0,
        default_rx2: Rx2Params { data_rate: 0, frequency: 869_525_000 },
        default_data_rate_index: 0,
        default_tx_power_index: 0,
        class_b_supported: false,
        class_c_supported: false,
    }
}

fn sample_service_profile() -> ServiceProfile {
    ServiceProfile {
        service_profile_id: 1,
        adr_enabled: true,
        rx_delay_override_secs: None,
        downlink_dwell_time_400ms: false,
        uplink_dwell_time_400ms: false,
        max_eirp_index: 0,
    }
}

fn bench_link_check_req_dispatch(c: &mut Criterion) {
    let engine = MacCommandEngine::with_defaults();
    let profile = sample_device_profile();
    let sp = sample_service_profile();
    let ctx = UplinkContext { rx_snr_db: vec![3.0, 5.0] };
    let block = MacCommandBlock::single(Cid::LinkCheckReq, MacCommandPayload::LinkCheckReq);

    c.bench_function("dispatch_link_check_req", |b| {
        b.iter_batched(
            sample_session,
            |mut session| {
                black_box(engine.dispatch(&ctx, &mut session, &profile, &sp, &block).unwrap())
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_link_check_req_dispatch);
criterion_main!(benches);
