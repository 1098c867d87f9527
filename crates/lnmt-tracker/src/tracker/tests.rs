use std::collections::{HashMap, HashSet};
use std::io::Write;

use async_trait::async_trait;
use chrono::TimeZone;
use lnmt_store::MemoryKvStore;

use super::*;
use crate::sources::TrafficCounters;
use crate::types::{AppPattern, DnsWhitelistPattern};

#[derive(Default)]
struct FakeTraffic {
    counters: Mutex<HashMap<MacAddr, TrafficCounters>>,
    failing: Mutex<HashSet<MacAddr>>,
}

impl FakeTraffic {
    fn set(&self, mac: &MacAddr, bytes_in: u64, bytes_out: u64) {
        lock(&self.counters).insert(*mac, TrafficCounters { bytes_in, bytes_out });
    }

    fn fail(&self, mac: &MacAddr) {
        lock(&self.failing).insert(*mac);
    }
}

#[async_trait]
impl TrafficSource for FakeTraffic {
    async fn counters(&self, mac: &MacAddr) -> Result<TrafficCounters, String> {
        if lock(&self.failing).contains(mac) {
            return Err("counter read failed".to_owned());
        }
        lock(&self.counters)
            .get(mac)
            .copied()
            .ok_or_else(|| "no counters".to_owned())
    }
}

#[derive(Default)]
struct FakePing {
    responding: Mutex<HashSet<String>>,
}

impl FakePing {
    fn respond(&self, ip: &str) {
        lock(&self.responding).insert(ip.to_owned());
    }
}

#[async_trait]
impl PingProber for FakePing {
    async fn ping(&self, ip: &str, _window_s: u32) -> bool {
        lock(&self.responding).contains(ip)
    }
}

#[derive(Default)]
struct FakeDns {
    queries: Mutex<HashMap<String, Vec<String>>>,
}

impl FakeDns {
    fn set(&self, ip: &str, queries: &[&str]) {
        lock(&self.queries).insert(
            ip.to_owned(),
            queries.iter().map(|q| (*q).to_owned()).collect(),
        );
    }
}

#[async_trait]
impl DnsQueryLog for FakeDns {
    async fn recent_queries(&self, ip: &str) -> Vec<String> {
        lock(&self.queries).get(ip).cloned().unwrap_or_default()
    }
}

struct Harness {
    tracker: DeviceTracker,
    traffic: Arc<FakeTraffic>,
    ping: Arc<FakePing>,
    dns: Arc<FakeDns>,
    audit: AuditLog,
    _dir: tempfile::TempDir,
    lease_path: PathBuf,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let lease_path = dir.path().join("dnsmasq.leases");
    std::fs::File::create(&lease_path).unwrap();

    let store: Arc<dyn lnmt_store::KvStore> = Arc::new(MemoryKvStore::new());
    let traffic = Arc::new(FakeTraffic::default());
    let ping = Arc::new(FakePing::default());
    let dns = Arc::new(FakeDns::default());
    let audit = AuditLog::new(Arc::clone(&store));

    let tracker = DeviceTracker::new(
        TrackerStorage::new(store),
        audit.clone(),
        EventBus::new(),
        DetectionSettings::default(),
        &lease_path,
        120,
        Arc::clone(&traffic) as Arc<dyn TrafficSource>,
        Arc::clone(&ping) as Arc<dyn PingProber>,
        Arc::clone(&dns) as Arc<dyn DnsQueryLog>,
    );

    Harness {
        tracker,
        traffic,
        ping,
        dns,
        audit,
        _dir: dir,
        lease_path,
    }
}

impl Harness {
    fn write_leases(&self, content: &str) {
        let mut file = std::fs::File::create(&self.lease_path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }
}

fn mac(s: &str) -> MacAddr {
    s.parse().unwrap()
}

fn at(minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2033, 3, 1, 12, minute, second).unwrap()
}

const TV: &str = "aa:bb:cc:dd:ee:01";

// -- reconciliation ----------------------------------------------------------

#[tokio::test]
async fn test_new_device_created_from_lease() {
    let h = harness();
    h.write_leases("1718000000 aa:bb:cc:dd:ee:01 192.168.1.55 android-1234\n");

    let summary = h.tracker.poll_once(at(0, 0)).await.unwrap();
    assert_eq!(summary.devices_seen, 1);
    assert_eq!(summary.new_devices, 1);

    let device = h.tracker.storage().get_device(&mac(TV)).unwrap().unwrap();
    assert_eq!(device.hostname, "android-1234");
    assert_eq!(device.ip, "192.168.1.55");
    assert_eq!(device.first_seen, at(0, 0));

    // Second cycle: same lease, no new device, last_seen advances.
    let summary = h.tracker.poll_once(at(2, 0)).await.unwrap();
    assert_eq!(summary.new_devices, 0);
    let device = h.tracker.storage().get_device(&mac(TV)).unwrap().unwrap();
    assert_eq!(device.last_seen, at(2, 0));
    assert!(device.last_seen >= device.first_seen);
}

#[tokio::test]
async fn test_reservation_overrides_lease_hostname_and_vlan() {
    let h = harness();
    h.tracker
        .set_reservation(
            "admin",
            &mac(TV),
            Some(Reservation {
                host_id: "livingroom-tv".to_owned(),
                desired_hostname: "tv".to_owned(),
                vlan_id: Some(VlanId(10)),
            }),
        )
        .unwrap();

    h.write_leases("1718000000 aa:bb:cc:dd:ee:01 192.168.1.55 android-1234\n");
    h.tracker.poll_once(at(0, 0)).await.unwrap();

    let device = h.tracker.storage().get_device(&mac(TV)).unwrap().unwrap();
    assert_eq!(device.hostname, "tv");
    assert_eq!(device.vlan_id, Some(VlanId(10)));
    assert_eq!(device.ip, "192.168.1.55");
}

#[tokio::test]
async fn test_missing_lease_file_is_hard_error() {
    let h = harness();
    std::fs::remove_file(&h.lease_path).unwrap();
    let err = h.tracker.poll_once(at(0, 0)).await.unwrap_err();
    assert!(matches!(err, TrackerError::LeaseFile { .. }));
    assert!(h.tracker.storage().list_devices().unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_lease_lines_skipped_with_audit() {
    let h = harness();
    h.write_leases(
        "garbage\n1718000000 aa:bb:cc:dd:ee:01 192.168.1.55 tv\n# comment\n",
    );
    let summary = h.tracker.poll_once(at(0, 0)).await.unwrap();
    assert_eq!(summary.devices_seen, 1);

    let rows = h
        .audit
        .query(&lnmt_store::AuditQuery {
            action: Some("lease_skip".to_owned()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert!(!rows[0].success);
}

// -- presence ----------------------------------------------------------------

#[tokio::test]
async fn test_online_detection_needs_both_byte_minima() {
    let h = harness();
    h.write_leases("1718000000 aa:bb:cc:dd:ee:01 192.168.1.55 tv\n");
    let tv = mac(TV);

    h.traffic.set(&tv, 0, 0);
    h.tracker.poll_once(at(0, 0)).await.unwrap();

    // In 2000 / out 500: below the outbound minimum, inactive.
    h.traffic.set(&tv, 2000, 500);
    h.tracker.poll_once(at(2, 0)).await.unwrap();
    assert!(!h.tracker.is_online(&tv).unwrap());

    // In +2000 / out +2000: both minima met, active.
    h.traffic.set(&tv, 4000, 2500);
    h.tracker.poll_once(at(4, 0)).await.unwrap();
    assert!(h.tracker.is_online(&tv).unwrap());

    let samples = h.tracker.storage().samples_for(&tv, 0).unwrap();
    assert!(samples[0].active);
    assert!(!samples[1].active);
    assert_eq!(samples[1].bytes_in_delta, 2000);
    assert_eq!(samples[1].bytes_out_delta, 500);
}

#[tokio::test]
async fn test_ping_alone_marks_active() {
    let h = harness();
    h.write_leases("1718000000 aa:bb:cc:dd:ee:01 192.168.1.55 tv\n");
    let tv = mac(TV);
    h.traffic.set(&tv, 0, 0);
    h.ping.respond("192.168.1.55");

    h.tracker.poll_once(at(0, 0)).await.unwrap();
    assert!(h.tracker.is_online(&tv).unwrap());
}

#[tokio::test]
async fn test_counter_failure_marks_sample_inactive() {
    let h = harness();
    h.write_leases("1718000000 aa:bb:cc:dd:ee:01 192.168.1.55 tv\n");
    let tv = mac(TV);
    h.traffic.fail(&tv);
    // Even a responding ping cannot rescue a failed counter read; the
    // sample is marked inactive and the cycle proceeds.
    h.ping.respond("192.168.1.55");

    let summary = h.tracker.poll_once(at(0, 0)).await.unwrap();
    assert_eq!(summary.devices_seen, 1);
    let samples = h.tracker.storage().samples_for(&tv, 0).unwrap();
    assert_eq!(samples.len(), 1);
    assert!(!samples[0].active);
}

// -- sessions ----------------------------------------------------------------

async fn go_online(h: &Harness, tv: &MacAddr, now: DateTime<Utc>) {
    h.ping.respond("192.168.1.55");
    h.traffic.set(tv, 0, 0);
    h.tracker.poll_once(now).await.unwrap();
    assert!(h.tracker.is_online(tv).unwrap());
}

#[tokio::test]
async fn test_session_accumulates_only_active_intervals() {
    let h = harness();
    h.write_leases("1718000000 aa:bb:cc:dd:ee:01 192.168.1.55 tv\n");
    let tv = mac(TV);

    // t0: online transition opens a session.
    go_online(&h, &tv, at(0, 0)).await;

    // Two more active samples, 120s apart.
    h.tracker.poll_once(at(2, 0)).await.unwrap();
    h.tracker.poll_once(at(4, 0)).await.unwrap();

    // Inactive sample: offline transition closes the session.
    lock(&h.ping.responding).clear();
    let summary = h.tracker.poll_once(at(6, 0)).await.unwrap();
    assert_eq!(summary.sessions_closed, 1);
    assert!(!h.tracker.is_online(&tv).unwrap());

    let sessions = h.tracker.storage().sessions_for(&tv, 0).unwrap();
    assert_eq!(sessions.len(), 1);
    let session = &sessions[0];
    // Sum of active intervals: 120 + 120.
    assert_eq!(session.seconds_used, 240);
    assert_eq!(session.started_at.unwrap(), at(0, 0));
    assert_eq!(session.ended_at.unwrap(), at(6, 0));
    // seconds_used <= ended - started.
    let wall = (session.ended_at.unwrap() - session.started_at.unwrap()).num_seconds();
    assert!(session.seconds_used <= wall);
}

#[tokio::test]
async fn test_new_online_transition_opens_fresh_session() {
    let h = harness();
    h.write_leases("1718000000 aa:bb:cc:dd:ee:01 192.168.1.55 tv\n");
    let tv = mac(TV);

    go_online(&h, &tv, at(0, 0)).await;
    lock(&h.ping.responding).clear();
    h.tracker.poll_once(at(2, 0)).await.unwrap();

    h.ping.respond("192.168.1.55");
    let summary = h.tracker.poll_once(at(4, 0)).await.unwrap();
    assert_eq!(summary.sessions_opened, 1);

    lock(&h.ping.responding).clear();
    h.tracker.poll_once(at(6, 0)).await.unwrap();

    let sessions = h.tracker.storage().sessions_for(&tv, 0).unwrap();
    assert_eq!(sessions.len(), 2);
}

#[tokio::test]
async fn test_session_closed_at_session_limit() {
    let h = harness();
    h.write_leases("1718000000 aa:bb:cc:dd:ee:01 192.168.1.55 tv\n");
    let tv = mac(TV);

    h.tracker
        .set_reservation(
            "admin",
            &tv,
            Some(Reservation {
                host_id: "tv".to_owned(),
                desired_hostname: "tv".to_owned(),
                vlan_id: Some(VlanId(10)),
            }),
        )
        .unwrap();
    h.tracker
        .set_threshold(
            "admin",
            VlanThreshold {
                vlan_id: VlanId(10),
                threshold_kbps: 1_000_000,
                time_window_secs: 3600,
                session_limit_secs: 150,
            },
        )
        .unwrap();

    go_online(&h, &tv, at(0, 0)).await;
    h.tracker.poll_once(at(2, 0)).await.unwrap(); // 120s accumulated
    let summary = h.tracker.poll_once(at(4, 0)).await.unwrap(); // 240s >= 150

    assert_eq!(summary.sessions_closed, 1);
    let sessions = h.tracker.storage().sessions_for(&tv, 0).unwrap();
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].seconds_used >= 150);
    // Device is still online; only the session hit its limit.
    assert!(h.tracker.is_online(&tv).unwrap());
}

// -- classification ----------------------------------------------------------

#[tokio::test]
async fn test_classification_respects_whitelist_and_pattern_order() {
    let h = harness();
    h.write_leases("1718000000 aa:bb:cc:dd:ee:01 192.168.1.55 tv\n");
    let tv = mac(TV);

    h.tracker
        .storage()
        .put_dns_whitelist(&DnsWhitelistPattern {
            id: 1,
            pattern: r"^ads\.".to_owned(),
        })
        .unwrap();
    h.tracker
        .storage()
        .put_app_pattern(&AppPattern {
            id: 1,
            pattern: r"netflix\.com$".to_owned(),
            category: "video".to_owned(),
        })
        .unwrap();
    h.tracker
        .storage()
        .put_app_pattern(&AppPattern {
            id: 2,
            pattern: r".*".to_owned(),
            category: "other".to_owned(),
        })
        .unwrap();

    // The whitelisted query comes first; it must not classify.
    h.dns
        .set("192.168.1.55", &["ads.netflix.com", "www.netflix.com"]);

    go_online(&h, &tv, at(0, 0)).await;
    lock(&h.ping.responding).clear();
    h.tracker.poll_once(at(2, 0)).await.unwrap();

    let sessions = h.tracker.storage().sessions_for(&tv, 0).unwrap();
    assert_eq!(sessions[0].app_category.as_deref(), Some("video"));
}

// -- vlan thresholds ---------------------------------------------------------

#[tokio::test]
async fn test_vlan_threshold_breach_recorded_and_alerted() {
    let h = harness();
    h.write_leases("1718000000 aa:bb:cc:dd:ee:01 192.168.1.55 tv\n");
    let tv = mac(TV);

    h.tracker
        .set_reservation(
            "admin",
            &tv,
            Some(Reservation {
                host_id: "tv".to_owned(),
                desired_hostname: "tv".to_owned(),
                vlan_id: Some(VlanId(10)),
            }),
        )
        .unwrap();
    // 100 kbps over 60s = 750,000 bytes in the window.
    h.tracker
        .set_threshold(
            "admin",
            VlanThreshold {
                vlan_id: VlanId(10),
                threshold_kbps: 100,
                time_window_secs: 60,
                session_limit_secs: 86_400,
            },
        )
        .unwrap();

    h.traffic.set(&tv, 0, 0);
    h.tracker.poll_once(at(0, 0)).await.unwrap();
    // 10 MB of traffic in one interval blows well past 100 kbps.
    h.traffic.set(&tv, 10_000_000, 10_000_000);
    h.tracker.poll_once(at(1, 0)).await.unwrap();

    let alerts = h.tracker.alerts(0).unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].vlan_id, VlanId(10));
    assert!(alerts[0].observed_kbps > 100);
}

#[tokio::test]
async fn test_invalid_threshold_rejected() {
    let h = harness();
    let err = h
        .tracker
        .set_threshold(
            "admin",
            VlanThreshold {
                vlan_id: VlanId(10),
                threshold_kbps: 0,
                time_window_secs: 60,
                session_limit_secs: 60,
            },
        )
        .unwrap_err();
    assert!(matches!(err, TrackerError::InvalidThreshold { .. }));
}

#[tokio::test]
async fn test_history_requires_known_device() {
    let h = harness();
    let err = h.tracker.history(&mac(TV), 10).unwrap_err();
    assert!(matches!(err, TrackerError::UnknownDevice { .. }));
}

#[tokio::test]
async fn test_list_devices_filters() {
    let h = harness();
    h.write_leases(
        "1718000000 aa:bb:cc:dd:ee:01 192.168.1.55 living-tv\n\
         1718000000 aa:bb:cc:dd:ee:02 192.168.1.56 phone\n",
    );
    h.tracker.poll_once(at(0, 0)).await.unwrap();

    let all = h.tracker.list_devices(&DeviceFilter::default()).unwrap();
    assert_eq!(all.len(), 2);

    let tvs = h
        .tracker
        .list_devices(&DeviceFilter {
            hostname_contains: Some("TV".to_owned()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(tvs.len(), 1);
    assert_eq!(tvs[0].hostname, "living-tv");
}
