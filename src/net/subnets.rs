//! Eager subnet loading from every host fragment under `hosts/`.

use std::fs;
use std::path::Path;

use tracing::{debug, error};

use crate::config::{ConfigTree, Layer};
use crate::node::{Expiry, NodeRegistry, check_id};

/// Merge the `Subnet` entries of every host fragment in `hosts_dir` into
/// `nodes`. Unreadable fragments and malformed subnets are skipped.
pub fn sync_all_subnets(hosts_dir: &Path, nodes: &mut NodeRegistry) {
    let entries = match fs::read_dir(hosts_dir) {
        Ok(entries) => entries,
        Err(e) => {
            error!(dir = %hosts_dir.display(), error = %e, "Could not open hosts directory");
            return;
        }
    };

    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str().filter(|n| check_id(n)) else {
            continue;
        };

        let mut fragment = ConfigTree::new();
        if let Err(e) = fragment.read_file(&entry.path(), Layer::Host) {
            debug!(host = name, error = %e, "skipping host fragment");
            continue;
        }

        let node = nodes.get_or_create(name);
        for cfg in fragment.lookup_all("Subnet") {
            let subnet = match cfg.as_subnet() {
                Ok(subnet) => subnet,
                Err(e) => {
                    debug!(host = name, error = %e, "ignoring subnet");
                    continue;
                }
            };
            match node.lookup_subnet_mut(&subnet.range) {
                Some(existing) => existing.expires = Expiry::Never,
                None => {
                    node.add_subnet(subnet);
                }
            }
        }
    }
}
