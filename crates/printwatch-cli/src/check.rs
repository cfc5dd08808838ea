use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use printwatch_core::ber::Oid;
use printwatch_core::snmp::oids;
use printwatch_core::{SnmpClient, SnmpSettings, UdpSnmpClient, Uplink, UplinkError};

const SAMPLE_DEVICES: usize = 3;

pub async fn run_check(cloud_url: &str, secret: &str, settings: SnmpSettings) -> Result<()> {
    println!("=== Agent Check ===");
    println!("Cloud:      {cloud_url}");
    println!(
        "SNMP:       community={} version={:?} port={} timeout={}ms",
        settings.community,
        settings.version,
        settings.port,
        settings.timeout.as_millis()
    );

    let uplink = Uplink::new(cloud_url, secret, Duration::from_secs(10))?;
    let started = Instant::now();
    let devices = match uplink.fetch_registry().await {
        Ok(devices) => {
            println!(
                "Registry:   OK, {} devices in {}ms",
                devices.len(),
                started.elapsed().as_millis()
            );
            devices
        }
        Err(err) => {
            println!("Registry:   FAIL, {err}");
            println!("Hint:       {}", registry_hint(&err));
            bail!("cloud check failed");
        }
    };

    let client = UdpSnmpClient::new(settings);
    let probe = [Oid::from_static(oids::SYS_DESCR)];
    let sample: Vec<_> = devices.iter().filter(|d| d.has_address()).take(SAMPLE_DEVICES).collect();
    if sample.is_empty() {
        println!("Devices:    none with an address, skipping SNMP");
        return Ok(());
    }

    let mut failures = 0;
    for device in sample {
        let address = device.address().unwrap_or_default();
        let started = Instant::now();
        match client.get(address, &probe).await {
            Ok(response) => {
                let descr = response
                    .value(&probe[0])
                    .and_then(|v| v.as_text())
                    .unwrap_or_else(|| "(no sysDescr)".to_string());
                println!(
                    "  OK   {:<16} {:<15} {}ms  {}",
                    device.sigla,
                    address,
                    started.elapsed().as_millis(),
                    descr
                );
            }
            Err(err) => {
                failures += 1;
                println!("  FAIL {:<16} {:<15} {} ({})", device.sigla, address, err, err.class().label());
            }
        }
    }

    if failures > 0 {
        println!("Hint:       check the community string and that UDP 161 is open from this host");
    }
    Ok(())
}

fn registry_hint(err: &UplinkError) -> &'static str {
    match err {
        UplinkError::Authentication => "the cloud rejected the secret, compare PRINTWATCH_SECRET on both sides",
        UplinkError::Transport(_) => "the cloud URL is unreachable from this host, check DNS and outbound HTTPS",
        UplinkError::InvalidUrl(_) | UplinkError::Status(_) | UplinkError::Validation(_) => {
            "the cloud answered unexpectedly, check the URL path"
        }
    }
}
