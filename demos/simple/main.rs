use std::time::Duration;

use featureprobe::{ClientConfig, FPUser};

pub fn main() -> featureprobe::Result<()> {
    // Configure env_logger to see FeatureProbe SDK logs.
    env_logger::Builder::from_env(env_logger::Env::new().default_filter_or("featureprobe")).init();

    // Without FEATUREPROBE_SERVER_SDK_KEY, serve toggles from the bundled repository file.
    let config = match std::env::var("FEATUREPROBE_SERVER_SDK_KEY") {
        Ok(server_sdk_key) => ClientConfig::from_server_sdk_key(server_sdk_key).remote_url(
            std::env::var("FEATUREPROBE_REMOTE_URL")
                .unwrap_or_else(|_| ClientConfig::DEFAULT_REMOTE_URL.to_owned()),
        ),
        Err(_) => ClientConfig::from_server_sdk_key("server-sdk-key").local_file_mode(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/resources/datasource/repo.json"
        )),
    };

    // Blocks until the first repository arrives or start_wait elapses. Until then, all getters
    // return the default value.
    let client = config.start_wait(Duration::from_secs(5)).to_client()?;

    let user = FPUser::new()
        .stable_rollout("user-1")
        .with("city", "Paris")
        .with("age", "30");

    let enabled = client.bool_value("bool_toggle", &user, false);
    println!("bool_toggle: {enabled}");

    let detail = client.number_detail("number_toggle", &user, 0.0);
    println!("number_toggle: {detail:?}");

    client.track("demo_run", &user, None);

    // Flushes pending events before exiting.
    client.close();

    Ok(())
}
