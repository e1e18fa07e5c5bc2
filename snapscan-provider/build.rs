fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Client for talking to provider plugins, server for plugins (and tests)
    // written against this crate.
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/provider.proto"], &["proto"])?;
    Ok(())
}
