/// Generate and write a systemd service file (Linux).
///
/// The working directory matters: config.toml and the image mirror
/// directory are both resolved relative to it.
#[cfg(target_os = "linux")]
pub fn install_service() -> anyhow::Result<()> {
    let exe = std::env::current_exe()?;
    let working_dir = std::env::current_dir()?;

    let unit = format!(
        r#"[Unit]
Description=shutterd - remote capture coordination daemon
After=network.target

[Service]
Type=simple
ExecStart={}
WorkingDirectory={}
Environment=RUST_LOG=info
Restart=on-failure
RestartSec=10

[Install]
WantedBy=multi-user.target
"#,
        exe.display(),
        working_dir.display()
    );

    let path = "/etc/systemd/system/shutterd.service";
    std::fs::write(path, unit)?;
    println!("Service file written to {}", path);
    println!(
        "shutterd reads config.toml (optional) and mirrors images under {}",
        working_dir.display()
    );
    println!("Run: sudo systemctl daemon-reload && sudo systemctl enable --now shutterd");
    Ok(())
}

/// Generate and write a launchd plist file (macOS).
#[cfg(target_os = "macos")]
pub fn install_service() -> anyhow::Result<()> {
    let exe = std::env::current_exe()?;
    let working_dir = std::env::current_dir()?;

    let plist = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>io.shutterd</string>
    <key>ProgramArguments</key>
    <array>
        <string>{}</string>
    </array>
    <key>WorkingDirectory</key>
    <string>{}</string>
    <key>EnvironmentVariables</key>
    <dict>
        <key>RUST_LOG</key>
        <string>info</string>
    </dict>
    <key>RunAtLoad</key>
    <true/>
    <key>KeepAlive</key>
    <true/>
    <key>StandardOutPath</key>
    <string>/tmp/shutterd.stdout.log</string>
    <key>StandardErrorPath</key>
    <string>/tmp/shutterd.stderr.log</string>
</dict>
</plist>
"#,
        exe.display(),
        working_dir.display()
    );

    let home = std::env::var("HOME")?;
    let path = format!("{}/Library/LaunchAgents/io.shutterd.plist", home);
    std::fs::write(&path, plist)?;
    println!("Plist written to {}", path);
    println!(
        "shutterd reads config.toml (optional) and mirrors images under {}",
        working_dir.display()
    );
    println!("Run: launchctl load {}", path);
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn install_service() -> anyhow::Result<()> {
    anyhow::bail!("Service installation is only supported on Linux and macOS");
}
