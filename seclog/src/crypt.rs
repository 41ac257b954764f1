//! ECDH 密钥协商与 AES 加解密
//!
//! 客户端启动时生成 secp256r1 临时密钥对，与配置的服务端公钥协商
//! 共享密钥，取其前 16 字节作为 AES-128-CBC 的会话密钥。
//! 每次加密生成新的随机 IV 并放在密文头部：
//! ```text
//! ┌──────────┬────────────────────────────┐
//! │ IV (16B) │ AES-CBC/PKCS#7 密文        │
//! └──────────┴────────────────────────────┘
//! ```
//! 解码端用服务端私钥与块头内嵌的客户端公钥重新协商出同一密钥。

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{ecdh, PublicKey, SecretKey};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

use crate::constants::{AES_BLOCK_LEN, AES_KEY_LEN, PRIV_KEY_LEN, SEC1_PUB_KEY_LEN};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// 加解密错误
#[derive(Error, Debug)]
pub enum CryptError {
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("invalid private key")]
    InvalidPrivateKey,
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("key too short: {0} bytes")]
    KeyTooShort(usize),
    #[error("ciphertext too short to contain IV")]
    ShortCiphertext,
    #[error("decrypt failed: bad padding")]
    BadPadding,
}

/// 生成 secp256r1 密钥对，返回 (私钥 32 字节, SEC1 非压缩公钥 65 字节)
pub fn generate_keypair() -> (Vec<u8>, Vec<u8>) {
    let secret = SecretKey::random(&mut OsRng);
    let public = secret.public_key().to_encoded_point(false);
    (secret.to_bytes().to_vec(), public.as_bytes().to_vec())
}

/// ECDH 密钥协商，返回共享密钥原始字节（32 字节）
///
/// 对端公钥非法（长度错误或不在曲线上）时返回错误。
pub fn ecdh_shared(private: &[u8], peer_public: &[u8]) -> Result<Vec<u8>, CryptError> {
    if private.len() != PRIV_KEY_LEN {
        return Err(CryptError::InvalidPrivateKey);
    }
    if peer_public.len() != SEC1_PUB_KEY_LEN {
        return Err(CryptError::InvalidPublicKey);
    }
    let secret = SecretKey::from_slice(private).map_err(|_| CryptError::InvalidPrivateKey)?;
    let public = PublicKey::from_sec1_bytes(peer_public).map_err(|_| CryptError::InvalidPublicKey)?;
    let shared = ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
    Ok(shared.raw_secret_bytes().to_vec())
}

/// 二进制转十六进制字符串（小写）
pub fn bytes_to_hex(data: &[u8]) -> String {
    hex::encode(data)
}

/// 十六进制字符串转二进制
pub fn hex_to_bytes(data: &str) -> Result<Vec<u8>, CryptError> {
    Ok(hex::decode(data.trim())?)
}

/// AES-128-CBC 加解密器
///
/// 密钥固定 16 字节；每次加密使用新的随机 IV。
pub struct AesCrypt {
    key: [u8; AES_KEY_LEN],
}

impl AesCrypt {
    /// 从原始字节构建，取前 16 字节作为密钥
    pub fn new(key: &[u8]) -> Result<Self, CryptError> {
        if key.len() < AES_KEY_LEN {
            return Err(CryptError::KeyTooShort(key.len()));
        }
        let mut k = [0u8; AES_KEY_LEN];
        k.copy_from_slice(&key[..AES_KEY_LEN]);
        Ok(Self { key: k })
    }

    /// 从十六进制字符串构建（在边界处解码一次）
    pub fn from_hex(hex_key: &str) -> Result<Self, CryptError> {
        let bin = hex_to_bytes(hex_key)?;
        Self::new(&bin)
    }

    /// 加密，输出为 IV(16) || 密文
    pub fn encrypt(&self, plain: &[u8]) -> Vec<u8> {
        let mut iv = [0u8; AES_BLOCK_LEN];
        OsRng.fill_bytes(&mut iv);

        // new_from_slices 的长度在此处恒定合法
        let enc = Aes128CbcEnc::new_from_slices(&self.key, &iv).unwrap();
        let cipher = enc.encrypt_padded_vec_mut::<Pkcs7>(plain);

        let mut out = Vec::with_capacity(AES_BLOCK_LEN + cipher.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&cipher);
        out
    }

    /// 解密，输入为 IV(16) || 密文
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptError> {
        if data.len() < AES_BLOCK_LEN {
            return Err(CryptError::ShortCiphertext);
        }
        let (iv, cipher) = data.split_at(AES_BLOCK_LEN);
        let dec = Aes128CbcDec::new_from_slices(&self.key, iv).unwrap();
        dec.decrypt_padded_vec_mut::<Pkcs7>(cipher)
            .map_err(|_| CryptError::BadPadding)
    }
}

impl std::fmt::Debug for AesCrypt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 不打印密钥内容
        f.write_str("AesCrypt")
    }
}
