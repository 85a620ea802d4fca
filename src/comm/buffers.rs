use super::{CommError, Transport};

/// Per-peer staging for one exchange: a send area, a recv area, and the
/// integer keys that order the send records.
///
/// Buffers are allocated once, to the maximum any exchange needs, and reused;
/// an exchange runs through the cursor lifecycle
/// `reset_cursors` → pack (`count_record`/`push_record`) → `set_expected_recv`
/// → [`RankBuffers::sort_and_transfer`] → `reset_read` → `take_recv`.
///
/// A record's key encodes where the *receiver* will consume it (for ghost
/// slabs, `2N · block + face`; for grid transfers, the block id). Receivers
/// walk their owned blocks in ascending id and faces in fixed order, so
/// sorting each peer's records by key reproduces the consumption order
/// exactly. No sizes or offsets ever cross the wire.
#[derive(Debug)]
pub struct RankBuffers {
    send: Vec<Vec<f64>>,
    recv: Vec<Vec<f64>>,
    keys: Vec<Vec<usize>>,
    i_send: Vec<usize>,
    i_recv: Vec<usize>,
    i_key: Vec<usize>,
    perm: Vec<usize>,
    scratch: Vec<f64>,
}

impl RankBuffers {
    /// Empty pool for `ranks` peers. Capacities are zero until
    /// [`RankBuffers::allocate`]; dry-run passes only move cursors, so they
    /// run against an unallocated pool.
    pub fn new(ranks: usize) -> Self {
        Self {
            send: vec![Vec::new(); ranks],
            recv: vec![Vec::new(); ranks],
            keys: vec![Vec::new(); ranks],
            i_send: vec![0; ranks],
            i_recv: vec![0; ranks],
            i_key: vec![0; ranks],
            perm: Vec::new(),
            scratch: Vec::new(),
        }
    }

    /// Fixes per-peer capacities: `send_floats`/`recv_floats` values and
    /// `records` sort keys.
    pub fn allocate(&mut self, send_floats: &[usize], recv_floats: &[usize], records: &[usize]) {
        for peer in 0..self.send.len() {
            self.send[peer] = vec![0.0; send_floats[peer]];
            self.recv[peer] = vec![0.0; recv_floats[peer]];
            self.keys[peer] = vec![0; records[peer]];
        }
    }

    pub fn reset_cursors(&mut self) {
        self.i_send.fill(0);
        self.i_recv.fill(0);
        self.i_key.fill(0);
    }

    /// Dry-run counterpart of [`RankBuffers::push_record`]: advances the
    /// cursors exactly as packing would, without touching data.
    pub fn count_record(&mut self, peer: usize, len: usize) {
        self.i_send[peer] += len;
        self.i_key[peer] += 1;
    }

    /// Appends a keyed record to a peer's send area.
    pub fn push_record(&mut self, peer: usize, key: usize, data: &[f64]) {
        let at = self.i_send[peer];
        self.send[peer][at..at + data.len()].copy_from_slice(data);
        self.i_send[peer] += data.len();

        self.keys[peer][self.i_key[peer]] = key;
        self.i_key[peer] += 1;
    }

    /// Floats currently staged for a peer.
    pub fn send_count(&self, peer: usize) -> usize {
        self.i_send[peer]
    }

    /// Declares how many floats the peer will deliver in the coming
    /// transfer. Known a priori from the sizing passes.
    pub fn set_expected_recv(&mut self, peer: usize, floats: usize) {
        debug_assert!(floats <= self.recv[peer].len());
        self.i_recv[peer] = floats;
    }

    /// Sorts every peer's staged records by key and exchanges messages.
    ///
    /// Records are opaque `dsize`-float blocks; the sort permutes record
    /// indices and gathers once, so data moves a single time. A message is
    /// posted only where the precomputed count is nonzero. On return every
    /// expected message has arrived; nothing is ordered across separate
    /// calls.
    pub fn sort_and_transfer<T: Transport>(
        &mut self,
        transport: &mut T,
        dsize: usize,
    ) -> Result<(), CommError> {
        let me = transport.my_rank();

        for peer in 0..self.send.len() {
            if peer == me || self.i_send[peer] == 0 {
                continue;
            }

            let floats = self.i_send[peer];
            let records = floats / dsize;
            debug_assert_eq!(records * dsize, floats);
            debug_assert_eq!(records, self.i_key[peer]);

            let keys = &self.keys[peer];
            self.perm.clear();
            self.perm.extend(0..records);
            self.perm.sort_by_key(|&record| keys[record]);

            self.scratch.clear();
            for &record in &self.perm {
                let at = record * dsize;
                self.scratch.extend_from_slice(&self.send[peer][at..at + dsize]);
            }

            self.send[peer][..floats].copy_from_slice(&self.scratch);
            transport.send(peer, &self.send[peer][..floats])?;
        }

        for peer in 0..self.recv.len() {
            if peer == me || self.i_recv[peer] == 0 {
                continue;
            }

            let floats = self.i_recv[peer];
            let (incoming, _) = self.recv[peer].split_at_mut(floats);
            transport.recv(peer, incoming)?;
        }

        Ok(())
    }

    /// Rewinds the recv cursors for consumption after a transfer.
    pub fn reset_read(&mut self) {
        self.i_recv.fill(0);
    }

    /// Consumes the next record from a peer's recv area.
    pub fn take_recv(&mut self, peer: usize, dsize: usize) -> &[f64] {
        let at = self.i_recv[peer];
        self.i_recv[peer] += dsize;
        &self.recv[peer][at..at + dsize]
    }
}
