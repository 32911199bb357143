use serde::Serialize;

//Canonical form: serde_json with declaration-order fields and BTreeMaps.
//Every hash and signature in the system is computed over these bytes.
pub fn encode<M: Serialize>(message: M) -> anyhow::Result<Vec<u8>> {
    serde_json::to_vec(&message).map_err(|e| anyhow::anyhow!(e))
}

pub fn decode<M: for<'de> serde::Deserialize<'de>>(bytes: &[u8]) -> anyhow::Result<M> {
    serde_json::from_slice(bytes).map_err(|e| anyhow::anyhow!(e))
}

pub fn to_hex<T: AsRef<[u8]>>(data: T) -> String {
    array_bytes::bytes2hex("", data.as_ref())
}

pub fn from_hex<T: AsRef<[u8]>>(data: T) -> anyhow::Result<Vec<u8>> {
    array_bytes::hex2bytes(data.as_ref()).map_err(|_| anyhow::anyhow!("Invalid hex string"))
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Payload {
        index: i64,
        known: BTreeMap<u32, i64>,
    }

    #[test]
    fn test_encoding_round_trip() {
        let payload = Payload {
            index: 3,
            known: BTreeMap::from([(1, 5), (0, -1)]),
        };
        let bytes = encode(&payload).unwrap();
        let decoded: Payload = decode(&bytes).unwrap();
        assert_eq!(payload, decoded);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let known = BTreeMap::from([(7u32, 2i64), (2, 9), (5, 0)]);
        assert_eq!(encode(&known).unwrap(), encode(&known).unwrap());
    }

    #[test]
    fn test_hex_round_trip() {
        let bytes = vec![0xde, 0xad, 0xbe, 0xef];
        assert_eq!(from_hex(to_hex(&bytes)).unwrap(), bytes);
    }
}
