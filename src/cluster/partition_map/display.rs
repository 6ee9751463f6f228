impl fmt::Display for PartitionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (namespace, partitions) in self.snapshot() {
            writeln!(f, "{}", "-".repeat(71))?;
            writeln!(f, "Namespace: {}", namespace)?;
            writeln!(f, "Regimes: {}", render_runs(partitions.regimes().iter().map(|r| r.to_string())))?;
            writeln!(f, "SCMode: {}", partitions.sc_mode())?;

            for replica in 0..partitions.replica_count() {
                let owners = partitions
                    .row_names(replica)
                    .into_iter()
                    .map(|name| name.unwrap_or_else(|| "nil".to_string()));
                if replica == 0 {
                    writeln!(f, "MASTER: {}", render_runs(owners))?;
                } else {
                    writeln!(f, "Replica {}: {}", replica, render_runs(owners))?;
                }
            }
        }
        Ok(())
    }
}

/// Collapses consecutive equal values into `first-last/value` runs.
fn render_runs(values: impl Iterator<Item = String>) -> String {
    let mut runs: Vec<(usize, usize, String)> = Vec::new();
    for (pid, value) in values.enumerate() {
        match runs.last_mut() {
            Some((_, end, last)) if *last == value => *end = pid,
            _ => runs.push((pid, pid, value)),
        }
    }
    runs.into_iter()
        .map(|(start, end, value)| {
            if start == end {
                format!("{}/{}", start, value)
            } else {
                format!("{}-{}/{}", start, end, value)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}
