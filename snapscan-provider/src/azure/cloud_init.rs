//! Scanner VM bootstrap.

use crate::scan_job::ScanJobConfig;

const CONFIG_DIR: &str = "/etc/snapscan";
const SCANNER_UNIT: &str = "snapscan-scanner.service";

/// Render the `#cloud-config` user data that runs the scanner container on boot.
///
/// The scanner mounts the attached target disk itself and reports to
/// `config.vmclarity_address`.
pub fn render_user_data(config: &ScanJobConfig) -> String {
    let cli_config = indent(&config.scanner_cli_config, 6);

    format!(
        r#"#cloud-config
package_upgrade: true
packages:
  - docker.io
write_files:
  - path: {dir}/scanconfig.yaml
    permissions: "0644"
    content: |
{cli_config}
  - path: /etc/systemd/system/{unit}
    permissions: "0644"
    content: |
      [Unit]
      Description=snapscan scanner
      Requires=docker.service
      After=network.target docker.service

      [Service]
      Type=oneshot
      WorkingDirectory=/opt
      ExecStartPre=docker pull {image}
      ExecStart=docker run --rm --name %n --privileged \
          -v /dev:/dev \
          -v {dir}:{dir} \
          {image} \
          --config {dir}/scanconfig.yaml \
          --server {address} \
          --asset-scan-id {asset_scan_id} \
          --mount-attached-volume

      [Install]
      WantedBy=multi-user.target
runcmd:
  - [ systemctl, daemon-reload ]
  - [ systemctl, start, docker.service ]
  - [ systemctl, start, {unit} ]
"#,
        dir = CONFIG_DIR,
        unit = SCANNER_UNIT,
        cli_config = cli_config,
        image = config.scanner_image,
        address = config.vmclarity_address,
        asset_scan_id = config.scan_metadata.asset_scan_id,
    )
}

fn indent(text: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    text.lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{}{}", pad, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
