//! The `RTA_METRICS` nested attribute (a set of `RTAX_*` u32 values) and
//! the MPLS label stack wire format used by `RTA_DST`/`RTA_NEWDST` and by
//! per-next-hop `RTA_VIA`/encap attributes on `AF_MPLS` routes.

use crate::attr::{self, Spec};
use crate::error::{Error, Result};

pub const RTAX_LOCK: usize = 1;
pub const RTAX_MTU: usize = 2;
pub const RTAX_WINDOW: usize = 3;
pub const RTAX_RTT: usize = 4;
pub const RTAX_RTTVAR: usize = 5;
pub const RTAX_SSTHRESH: usize = 6;
pub const RTAX_CWND: usize = 7;
pub const RTAX_ADVMSS: usize = 8;
pub const RTAX_REORDERING: usize = 9;
pub const RTAX_HOPLIMIT: usize = 10;
pub const RTAX_INITCWND: usize = 11;
pub const RTAX_FEATURES: usize = 12;
pub const RTAX_RTO_MIN: usize = 13;
pub const RTAX_INITRWND: usize = 14;
pub const RTAX_QUICKACK: usize = 15;
pub const RTAX_MAX: usize = 16;

const WANT: [Spec; RTAX_MAX] = {
    let mut t = [Spec::UNDEFINED; RTAX_MAX];
    let mut i = 1;
    while i < RTAX_MAX {
        t[i] = Spec::checked(4);
        i += 1;
    }
    t
};

/// The decoded `RTAX_*` set. `lock` records which metrics the kernel
/// will not let a lower-preference route override; everything else is
/// `Some` only for the metrics actually present on the wire, so a route
/// that never set `advmss` round-trips without fabricating one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metrics {
    pub lock: u32,
    pub mtu: Option<u32>,
    pub window: Option<u32>,
    pub rtt: Option<u32>,
    pub rttvar: Option<u32>,
    pub ssthresh: Option<u32>,
    pub cwnd: Option<u32>,
    pub advmss: Option<u32>,
    pub reordering: Option<u32>,
    pub hoplimit: Option<u32>,
    pub initcwnd: Option<u32>,
    pub features: Option<u32>,
    pub rto_min: Option<u32>,
    pub initrwnd: Option<u32>,
    pub quickack: Option<u32>,
}

pub fn parse(buf: &[u8]) -> Result<Metrics> {
    let set = attr::parse(buf, &WANT)?;
    Ok(Metrics {
        lock: set.get_u32(RTAX_LOCK).unwrap_or(0),
        mtu: set.get_u32(RTAX_MTU),
        window: set.get_u32(RTAX_WINDOW),
        rtt: set.get_u32(RTAX_RTT),
        rttvar: set.get_u32(RTAX_RTTVAR),
        ssthresh: set.get_u32(RTAX_SSTHRESH),
        cwnd: set.get_u32(RTAX_CWND),
        advmss: set.get_u32(RTAX_ADVMSS),
        reordering: set.get_u32(RTAX_REORDERING),
        hoplimit: set.get_u32(RTAX_HOPLIMIT),
        initcwnd: set.get_u32(RTAX_INITCWND),
        features: set.get_u32(RTAX_FEATURES),
        rto_min: set.get_u32(RTAX_RTO_MIN),
        initrwnd: set.get_u32(RTAX_INITRWND),
        quickack: set.get_u32(RTAX_QUICKACK),
    })
}

pub fn build(builder: &mut attr::Builder, code: u16, metrics: &Metrics) -> Result<()> {
    if metrics_are_empty(metrics) {
        return Ok(());
    }
    let start = builder.open_nested(code)?;
    if metrics.lock != 0 {
        builder.push_u32(RTAX_LOCK as u16, metrics.lock)?;
    }
    let mut push = |idx: usize, val: Option<u32>| -> Result<()> {
        if let Some(v) = val {
            builder.push_u32(idx as u16, v)?;
        }
        Ok(())
    };
    push(RTAX_MTU, metrics.mtu)?;
    push(RTAX_WINDOW, metrics.window)?;
    push(RTAX_RTT, metrics.rtt)?;
    push(RTAX_RTTVAR, metrics.rttvar)?;
    push(RTAX_SSTHRESH, metrics.ssthresh)?;
    push(RTAX_CWND, metrics.cwnd)?;
    push(RTAX_ADVMSS, metrics.advmss)?;
    push(RTAX_REORDERING, metrics.reordering)?;
    push(RTAX_HOPLIMIT, metrics.hoplimit)?;
    push(RTAX_INITCWND, metrics.initcwnd)?;
    push(RTAX_FEATURES, metrics.features)?;
    push(RTAX_RTO_MIN, metrics.rto_min)?;
    push(RTAX_INITRWND, metrics.initrwnd)?;
    push(RTAX_QUICKACK, metrics.quickack)?;
    builder.close_nested(start);
    Ok(())
}

fn metrics_are_empty(m: &Metrics) -> bool {
    m.lock == 0
        && m.mtu.is_none()
        && m.window.is_none()
        && m.rtt.is_none()
        && m.rttvar.is_none()
        && m.ssthresh.is_none()
        && m.cwnd.is_none()
        && m.advmss.is_none()
        && m.reordering.is_none()
        && m.hoplimit.is_none()
        && m.initcwnd.is_none()
        && m.features.is_none()
        && m.rto_min.is_none()
        && m.initrwnd.is_none()
        && m.quickack.is_none()
}

const MPLS_LABEL_SHIFT: u32 = 12;
const MPLS_BOS_MASK: u32 = 0x1;

/// Decodes a stream of 32-bit big-endian MPLS label words into their
/// label values, most significant word first. The bottom-of-stack bit
/// is checked on the last word only, as a sanity check against a
/// truncated stack; it is not otherwise surfaced.
pub fn parse_mpls_stack(buf: &[u8]) -> Result<Vec<u32>> {
    if buf.len() % 4 != 0 {
        return Err(Error::Truncated);
    }
    let mut labels = Vec::with_capacity(buf.len() / 4);
    for (i, chunk) in buf.chunks(4).enumerate() {
        let word = u32::from_be_bytes(chunk.try_into().unwrap());
        labels.push(word >> MPLS_LABEL_SHIFT);
        let is_last = i + 1 == buf.len() / 4;
        let bos = word & MPLS_BOS_MASK != 0;
        if is_last && !bos {
            return Err(Error::Truncated);
        }
    }
    Ok(labels)
}

pub fn encode_mpls_stack(out: &mut Vec<u8>, labels: &[u32]) {
    for (i, &label) in labels.iter().enumerate() {
        let bos = u32::from(i + 1 == labels.len());
        let word = (label << MPLS_LABEL_SHIFT) | bos;
        out.extend_from_slice(&word.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_round_trip_through_the_attribute_stream() {
        let metrics = Metrics {
            lock: 1 << RTAX_MTU,
            mtu: Some(1500),
            advmss: Some(1460),
            ..Default::default()
        };
        let mut b = attr::Builder::with_capacity(128);
        build(&mut b, 7, &metrics).unwrap();
        let bytes = b.into_bytes();

        const OUTER: [Spec; 8] = {
            let mut t = [Spec::UNDEFINED; 8];
            t[7] = Spec::unchecked();
            t
        };
        let set = attr::parse(&bytes, &OUTER).unwrap();
        let decoded = parse(set.get(7).unwrap()).unwrap();
        assert_eq!(decoded, metrics);
    }

    #[test]
    fn empty_metrics_emit_nothing() {
        let mut b = attr::Builder::with_capacity(128);
        build(&mut b, 7, &Metrics::default()).unwrap();
        assert_eq!(b.len(), 0);
    }

    #[test]
    fn mpls_single_label_round_trips() {
        let mut bytes = Vec::new();
        encode_mpls_stack(&mut bytes, &[100]);
        assert_eq!(parse_mpls_stack(&bytes).unwrap(), vec![100]);
    }

    #[test]
    fn mpls_multi_label_stack_round_trips_in_order() {
        let mut bytes = Vec::new();
        encode_mpls_stack(&mut bytes, &[100, 200, 300]);
        assert_eq!(parse_mpls_stack(&bytes).unwrap(), vec![100, 200, 300]);
    }

    #[test]
    fn mpls_stack_missing_bottom_of_stack_bit_is_rejected() {
        let word: u32 = 100 << MPLS_LABEL_SHIFT;
        let bytes = word.to_be_bytes().to_vec();
        assert!(parse_mpls_stack(&bytes).is_err());
    }
}
