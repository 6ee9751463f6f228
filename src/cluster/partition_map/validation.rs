/// Outcome of a structural pass over the partition map.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    /// Grid or regime sizes that differ from the partition count.
    pub structural: Vec<String>,
    /// Partition ids without a resolved master, per namespace.
    pub missing_masters: BTreeMap<String, Vec<usize>>,
    /// Partition ids with an unresolved non-master replica, per namespace.
    /// An id appears once per missing replica row.
    pub missing_replicas: BTreeMap<String, Vec<usize>>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.structural.is_empty()
            && self.missing_masters.is_empty()
            && self.missing_replicas.is_empty()
    }

    /// Aggregates every finding into one chain headed by the
    /// invalid-partition-map sentinel.
    pub fn into_error(self) -> Option<Error> {
        if self.is_valid() {
            return None;
        }

        let mut errs: Option<Error> = None;
        for message in self.structural {
            errs = chain_errors(Some(Error::new(ResultCode::CommonError, message)), errs);
        }
        for (namespace, missing) in &self.missing_masters {
            let message = format!(
                "Master partition nodes not defined for namespace `{}`: {} out of {}",
                namespace,
                missing.len(),
                PARTITIONS
            );
            errs = chain_errors(Some(Error::new(ResultCode::CommonError, message)), errs);
        }
        for (namespace, missing) in &self.missing_replicas {
            let message = format!(
                "Replica partition nodes not defined for namespace `{}`: {}",
                namespace,
                missing.len()
            );
            errs = chain_errors(Some(Error::new(ResultCode::CommonError, message)), errs);
        }

        chain_errors(Some(ERR_INVALID_PARTITION_MAP.err()), errs)
    }
}

impl PartitionMap {
    /// Checks sizes against the partition count and collects every partition
    /// whose slots do not resolve to a live node.
    pub fn validation_report(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        for (namespace, partitions) in self.snapshot() {
            if partitions.partition_count() != PARTITIONS {
                report.structural.push(format!(
                    "Wrong number of regimes for namespace `{}`. Must be {}, but found {}.",
                    namespace,
                    PARTITIONS,
                    partitions.partition_count()
                ));
            }

            for (replica, length) in partitions.row_lengths().into_iter().enumerate() {
                if length != PARTITIONS {
                    report.structural.push(format!(
                        "Wrong number of partitions for namespace `{}`, replica `{}`. Must be {}, but found {}.",
                        namespace, replica, PARTITIONS, length
                    ));
                }

                let missing: Vec<usize> = (0..length)
                    .filter(|pid| {
                        partitions
                            .node(replica, *pid)
                            .is_none_or(|node| !node.is_active())
                    })
                    .collect();
                if missing.is_empty() {
                    continue;
                }
                let target = if replica == 0 {
                    &mut report.missing_masters
                } else {
                    &mut report.missing_replicas
                };
                target.entry(namespace.clone()).or_default().extend(missing);
            }
        }

        report
    }

    /// Fails with one chained error when any namespace has structural
    /// problems or unresolved slots. The map itself is left untouched.
    pub fn validate(&self) -> Result<()> {
        match self.validation_report().into_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
