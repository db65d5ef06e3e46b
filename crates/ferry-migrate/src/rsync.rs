//! rsync command construction
//!
//! Migration pods mount the source claim at [`SOURCE_MOUNT_PATH`] and the
//! destination at [`DEST_MOUNT_PATH`]; the command copies the former into the
//! latter, optionally over ssh to a remote pod.

/// Where the source claim is mounted in the migration container
pub const SOURCE_MOUNT_PATH: &str = "/source";
/// Where the destination claim is mounted in the migration container
pub const DEST_MOUNT_PATH: &str = "/dest";

/// ssh transport options; migration pods have no stable host keys
const SSH_TRANSPORT: &str = "ssh -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null";

/// Build the rsync command line.
///
/// The trailing slash on the source copies its contents rather than the
/// directory itself. With `ssh_target_host` the destination becomes
/// `root@<host>:/dest/`.
pub fn build_rsync_command(
    delete_extraneous_files: bool,
    ssh_target_host: Option<&str>,
) -> Vec<String> {
    let mut command = vec!["rsync".to_string(), "-avz".to_string()];
    if delete_extraneous_files {
        command.push("--delete".to_string());
    }

    let target = match ssh_target_host {
        Some(host) => {
            command.push("-e".to_string());
            command.push(SSH_TRANSPORT.to_string());
            format!("root@{}:{}/", host, DEST_MOUNT_PATH)
        }
        None => format!("{}/", DEST_MOUNT_PATH),
    };

    command.push(format!("{}/", SOURCE_MOUNT_PATH));
    command.push(target);
    command
}
