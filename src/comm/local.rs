use crossbeam_channel::{unbounded, Receiver, Sender};

use super::{CommError, Transport};

/// Builds the transports of an in-process cluster: one [`LocalTransport`] per
/// rank, connected pairwise by unbounded channels. Each transport is moved to
/// the thread that runs its rank; a cluster of one is the serial case.
pub struct LocalCluster;

impl LocalCluster {
    pub fn new(ranks: usize) -> Vec<LocalTransport> {
        assert!(ranks > 0);

        // pairs[from][to] carries messages from rank `from` to rank `to`.
        let pairs: Vec<Vec<(Sender<Vec<f64>>, Receiver<Vec<f64>>)>> = (0..ranks)
            .map(|_| (0..ranks).map(|_| unbounded()).collect())
            .collect();

        (0..ranks)
            .map(|rank| LocalTransport {
                rank,
                ranks,
                senders: pairs[rank].iter().map(|(tx, _)| tx.clone()).collect(),
                receivers: (0..ranks).map(|from| pairs[from][rank].1.clone()).collect(),
            })
            .collect()
    }
}

/// One rank's endpoint in a [`LocalCluster`].
pub struct LocalTransport {
    rank: usize,
    ranks: usize,
    /// Channel to each peer, indexed by peer rank.
    senders: Vec<Sender<Vec<f64>>>,
    /// Channel from each peer, indexed by peer rank.
    receivers: Vec<Receiver<Vec<f64>>>,
}

impl Transport for LocalTransport {
    fn my_rank(&self) -> usize {
        self.rank
    }

    fn num_ranks(&self) -> usize {
        self.ranks
    }

    fn send(&mut self, peer: usize, data: &[f64]) -> Result<(), CommError> {
        debug_assert!(peer != self.rank, "self-sends are not allowed");

        self.senders[peer]
            .send(data.to_vec())
            .map_err(|_| CommError::Disconnected { peer })
    }

    fn recv(&mut self, peer: usize, data: &mut [f64]) -> Result<(), CommError> {
        debug_assert!(peer != self.rank, "self-receives are not allowed");

        let message = self.receivers[peer]
            .recv()
            .map_err(|_| CommError::Disconnected { peer })?;

        if message.len() != data.len() {
            return Err(CommError::SizeMismatch {
                peer,
                expected: data.len(),
                got: message.len(),
            });
        }

        data.copy_from_slice(&message);
        Ok(())
    }

    fn all_reduce_max(&mut self, value: f64) -> Result<f64, CommError> {
        for peer in 0..self.ranks {
            if peer != self.rank {
                self.send(peer, &[value])?;
            }
        }

        let mut result = value;

        for peer in 0..self.ranks {
            if peer != self.rank {
                let mut incoming = [0.0];
                self.recv(peer, &mut incoming)?;
                result = result.max(incoming[0]);
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_to_point_round_trip() {
        let mut cluster = LocalCluster::new(2);
        let mut right = cluster.pop().unwrap();
        let mut left = cluster.pop().unwrap();

        let worker = std::thread::spawn(move || {
            let mut incoming = [0.0; 3];
            right.recv(0, &mut incoming).unwrap();
            right.send(0, &[incoming.iter().sum()]).unwrap();
        });

        left.send(1, &[1.0, 2.0, 3.0]).unwrap();
        let mut reply = [0.0];
        left.recv(1, &mut reply).unwrap();

        assert_eq!(reply[0], 6.0);
        worker.join().unwrap();
    }

    #[test]
    fn reduce_max_over_ranks() {
        let cluster = LocalCluster::new(4);

        let workers: Vec<_> = cluster
            .into_iter()
            .map(|mut transport| {
                std::thread::spawn(move || {
                    let mine = transport.my_rank() as f64;
                    transport.all_reduce_max(mine).unwrap()
                })
            })
            .collect();

        for worker in workers {
            assert_eq!(worker.join().unwrap(), 3.0);
        }
    }

    #[test]
    fn size_mismatch_is_an_error() {
        let mut cluster = LocalCluster::new(2);
        let mut right = cluster.pop().unwrap();
        let mut left = cluster.pop().unwrap();

        left.send(1, &[1.0, 2.0]).unwrap();

        let mut incoming = [0.0; 3];
        assert!(matches!(
            right.recv(0, &mut incoming),
            Err(CommError::SizeMismatch { peer: 0, .. })
        ));
    }
}
