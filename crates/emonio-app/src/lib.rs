pub mod config;
mod supervisor;

use anyhow::Result;
use tracing::{info, warn};

use config_flow::{ConfigFlow, FlowError, UserInput};
use poller_actor::DeviceConfig;

pub use config::{load_catalog, AppConfig, DeviceSettings, SetupConfig};
pub use supervisor::run_pollers;

/// Runs every configured device through the config flow. The flow's test
/// read targets the first measurement of the device's own register map.
///
/// Devices that fail are skipped with a warning, unless `strict` is set, in
/// which case the first failure is returned.
pub async fn prepare_devices(config: &AppConfig, strict: bool) -> Result<Vec<DeviceConfig>> {
    let flow = ConfigFlow::new(config.flow_options());
    let mut prepared = Vec::with_capacity(config.devices.len());

    for device in &config.devices {
        let input = UserInput {
            host: device.host.clone(),
            port: Some(config.port_for(device)),
        };
        let outcome = match config.device_catalog(device) {
            Ok(catalog) => {
                let submitted = flow.submit_with_test_read(input, catalog.first()).await;
                submitted
                    .map(|entry| config.device_config(device, &entry, catalog))
                    .map_err(flow_error)
            }
            Err(err) => Err(err),
        };

        match outcome {
            Ok(device_config) => {
                info!(
                    device = %device_config.name,
                    host = %device_config.client.host,
                    port = device_config.client.port,
                    "device ready"
                );
                prepared.push(device_config);
            }
            Err(err) if strict => {
                return Err(err.context(format!("device {} failed setup", device.host)));
            }
            Err(err) => {
                warn!(host = %device.host, error = %format!("{err:#}"), "skipping device");
            }
        }
    }

    Ok(prepared)
}

fn flow_error(err: FlowError) -> anyhow::Error {
    let (field, key) = (err.field(), err.translation_key());
    anyhow::Error::new(err).context(format!("{field}: {key}"))
}
