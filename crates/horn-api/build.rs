fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Subscribe service: server for Horn, client for integration tests
    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/twinface_subscribe.proto"], &["proto"])?;

    // Broker payloads, messages only
    tonic_prost_build::configure()
        .build_server(false)
        .build_client(false)
        .compile_protos(&["proto/twins_notify.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/");

    Ok(())
}
