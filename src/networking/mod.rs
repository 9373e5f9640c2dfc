/*!

# RLPx Transport

## Introduction

Ethereum nodes talk to each other over RLPx: a TCP connection that starts with an
authenticated key exchange and then carries encrypted, MAC-chained frames. Every frame holds
one devp2p message, identified by a numeric code.

## Handshake

The dialing side (initiator) knows the static public key of the node it calls. It sends an
`auth` packet and the listening side (recipient) answers with an `ack`. Both are ECIES encrypted
to the other side's static key and use the EIP-8 layout:

```bytes
0-1     size (big-endian u16), also the ECIES shared MAC data
2..     ECIES(rlp(body) || random padding)
```

```bytes
auth:   [signature(65), initiator-pubkey(64), initiator-nonce(32), version]
ack:    [recipient-ephemeral-pubkey(64), recipient-nonce(32), version]
```

The signature is made with the initiator's ephemeral key over
`ecdh(initiator-static, recipient-static) ^ initiator-nonce`, which lets the recipient recover
the initiator's ephemeral public key from it. Older fixed size packets (307 byte auth, 210 byte
ack) are still accepted.

Both sides then derive

```text
ephemeral-key = ecdh(local-ephemeral, remote-ephemeral)
shared-secret = keccak(ephemeral-key || keccak(recipient-nonce || initiator-nonce))
aes-secret    = keccak(ephemeral-key || shared-secret)
mac-secret    = keccak(ephemeral-key || aes-secret)
egress-mac    = keccak.init(mac-secret ^ remote-nonce || sent-packet)
ingress-mac   = keccak.init(mac-secret ^ local-nonce || received-packet)
```

## Frames

```bytes
0-15    header ciphertext: frame-size(u24) || rlp([0, 0]) || zero padding
16-31   header MAC
32..    frame ciphertext: rlp(message-code) || payload || zero padding to 16 bytes
n..n+16 frame MAC
```

Header and frame are encrypted with one continuous AES-256-CTR keystream per direction. The MACs
are keyed by `mac-secret` and chain over every header and frame sent in that direction, so a
dropped, reordered or altered frame is detected.

Once both sides announced base protocol version 5 or newer in their Hello, payloads (everything
after the message code) are snappy compressed.

## Messages

```bytes
0x00    Hello
0x01    Disconnect
0x02    Ping
0x03    Pong
0x10    Status
0x11    NewBlockHashes
0x13    GetBlockHeaders
0x14    BlockHeaders
0x15    GetBlockBodies
0x16    BlockBodies
0x17    NewBlock
```

From eth/66 on, the four request/response messages are wrapped as `[request-id, body]`.

A `Session` ties it together: it dials a `Peer`, runs the handshake, exchanges Hello and
Status, and then sends and receives typed messages while answering the remote's queries.

*/
pub mod frame;
pub mod handshake;
pub mod message;
pub mod peer;
pub mod session;
