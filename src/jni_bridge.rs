//! JNI entry points for the Android host (`com.perfmonitor.PerfMonitorNative`).
//!
//! The Java side forwards Choreographer frames, battery-changed intents and
//! main-looper pumps; the Rust side owns everything else.

use jni::objects::{JClass, JString};
use jni::sys::{jint, jlong};
use jni::JNIEnv;
use once_cell::sync::Lazy;

use crate::battery::{BatteryIntent, BatteryStatus};
use crate::config::MonitorConfig;
use crate::error::{log_monitor_error, ErrorCode};
use crate::monitor::{self, HostBindings, MonitorContext};

static HOST: Lazy<(MonitorContext, HostBindings)> = Lazy::new(MonitorContext::standalone);

/// JNI_OnLoad is called when the native library is loaded by Android
#[no_mangle]
pub extern "system" fn JNI_OnLoad(
    _vm: jni::JavaVM,
    _reserved: *mut std::ffi::c_void,
) -> jni::sys::jint {
    crate::init_logging();
    log::info!("[JniBridge] JNI_OnLoad called");
    jni::sys::JNI_VERSION_1_6
}

fn read_string(env: &mut JNIEnv, value: &JString) -> Option<String> {
    match env.get_string(value) {
        Ok(value) => Some(value.into()),
        Err(err) => {
            log::warn!("[JniBridge] Could not read Java string: {}", err);
            None
        }
    }
}

/// Returns 0 on success, otherwise the `MonitorError` code.
#[no_mangle]
pub extern "system" fn Java_com_perfmonitor_PerfMonitorNative_nativeStart<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    log_root: JString<'local>,
    metrics_interval_ms: jlong,
    anr_timeout_ms: jlong,
    leak_detection_delay_ms: jlong,
) -> jint {
    let Some(log_root) = read_string(&mut env, &log_root) else {
        return -1;
    };
    let config = MonitorConfig {
        metrics_interval_ms: metrics_interval_ms.max(0) as u64,
        anr_timeout_ms: anr_timeout_ms.max(0) as u64,
        leak_detection_delay_ms: leak_detection_delay_ms.max(0) as u64,
    };
    let context = HOST.0.clone().with_log_root(log_root);

    match monitor::initialize(context, config) {
        Ok(_) => 0,
        Err(err) => {
            log_monitor_error(&err, "jni_start");
            err.code()
        }
    }
}

#[no_mangle]
pub extern "system" fn Java_com_perfmonitor_PerfMonitorNative_nativeDispatchBattery<'local>(
    _env: JNIEnv<'local>,
    _class: JClass<'local>,
    level: jint,
    scale: jint,
    status: jint,
    temperature_tenths_c: jint,
) {
    // Java passes -1 for extras missing from the intent.
    let present = |value: jint| (value >= 0).then_some(value);
    HOST.1.battery.dispatch(BatteryIntent {
        level: present(level),
        scale: present(scale),
        status: present(status).map(BatteryStatus::from_android_code),
        temperature_tenths_c: (temperature_tenths_c != jint::MIN).then_some(temperature_tenths_c),
    });
}

#[no_mangle]
pub extern "system" fn Java_com_perfmonitor_PerfMonitorNative_nativeFrameTick<'local>(
    _env: JNIEnv<'local>,
    _class: JClass<'local>,
    frame_time_nanos: jlong,
) {
    HOST.1.frames.tick(frame_time_nanos.max(0) as u64);
}

/// Called from a main-looper idle handler; returns the number of tasks run.
#[no_mangle]
pub extern "system" fn Java_com_perfmonitor_PerfMonitorNative_nativePumpLooper<'local>(
    _env: JNIEnv<'local>,
    _class: JClass<'local>,
) -> jint {
    HOST.1.looper.run_pending() as jint
}

#[no_mangle]
pub extern "system" fn Java_com_perfmonitor_PerfMonitorNative_nativeRecordCustomMetric<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    name: JString<'local>,
    detail: JString<'local>,
) {
    let (Some(name), Some(detail)) = (read_string(&mut env, &name), read_string(&mut env, &detail))
    else {
        return;
    };
    monitor::record_custom_metric(name, detail);
}

#[no_mangle]
pub extern "system" fn Java_com_perfmonitor_PerfMonitorNative_nativeShutdown<'local>(
    _env: JNIEnv<'local>,
    _class: JClass<'local>,
) {
    monitor::shutdown();
}
