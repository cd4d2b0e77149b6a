fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/dss/dss.proto");

    let fds = protox::compile(["proto/dss/dss.proto"], ["proto"])?;

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .skip_protoc_run()
        .compile_fds(fds)?;
    Ok(())
}
