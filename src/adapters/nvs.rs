//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements [`StoragePort`] for the gateway.  Every subsystem keeps its
//! keys in its own namespace (`readregs`, `freq`, `net`, `security`, `ota`,
//! `ota_progress`); values are stored as blobs.
//!
//! # Security
//!
//! - Encrypted NVS: on ESP32 the whole partition, including the `security`
//!   namespace holding the PSK and firmware secret, is encrypted when
//!   `CONFIG_NVS_ENCRYPTION` is set.  The simulation backend uses plaintext
//!   (dev/test only).
//! - Atomic writes: ESP-IDF NVS commits are atomic per `nvs_commit()`.

use crate::app::ports::{StorageError, StoragePort};
use log::info;

#[cfg(target_os = "espidf")]
use log::warn;

#[cfg(not(target_os = "espidf"))]
use std::{cell::RefCell, collections::BTreeMap};

/// Host backend entries keyed by `(namespace, key)`.
#[cfg(not(target_os = "espidf"))]
type SimStore = BTreeMap<(String, String), Vec<u8>>;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

/// NVS namespace and key names are limited to 15 characters.
#[cfg(target_os = "espidf")]
const NVS_NAME_MAX: usize = 15;

pub struct NvsAdapter {
    #[cfg(not(target_os = "espidf"))]
    store: RefCell<SimStore>,
}

impl NvsAdapter {
    /// Create a new NvsAdapter and initialise NVS flash.
    ///
    /// On first boot or after a version mismatch the NVS partition is erased
    /// and re-initialised automatically.
    pub fn new() -> Result<Self, StorageError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: nvs_flash_init / nvs_flash_erase are called from the
            // single main-task context before any concurrent NVS access.
            let ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES || ret == ESP_ERR_NVS_NEW_VERSION_FOUND {
                warn!("NVS: erasing and re-initialising flash partition");
                if unsafe { nvs_flash_erase() } != ESP_OK {
                    return Err(StorageError::IoError);
                }
                if unsafe { nvs_flash_init() } != ESP_OK {
                    return Err(StorageError::IoError);
                }
            } else if ret != ESP_OK {
                return Err(StorageError::IoError);
            }
            info!("NvsAdapter: ESP-IDF NVS initialised");
        }

        #[cfg(not(target_os = "espidf"))]
        info!("NvsAdapter: simulation backend");

        Ok(Self {
            #[cfg(not(target_os = "espidf"))]
            store: RefCell::new(SimStore::new()),
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn sim_key(namespace: &str, key: &str) -> (String, String) {
        (namespace.to_owned(), key.to_owned())
    }

    /// NUL-terminated copy of an NVS name, truncated to the NVS limit.
    #[cfg(target_os = "espidf")]
    fn c_name(name: &str) -> [u8; NVS_NAME_MAX + 1] {
        let mut buf = [0u8; NVS_NAME_MAX + 1];
        let bytes = name.as_bytes();
        let len = bytes.len().min(NVS_NAME_MAX);
        buf[..len].copy_from_slice(&bytes[..len]);
        buf
    }

    /// Open an NVS namespace, execute a closure with the handle, then close.
    #[cfg(target_os = "espidf")]
    fn with_nvs_handle<F, T>(namespace: &str, write: bool, f: F) -> Result<T, i32>
    where
        F: FnOnce(nvs_handle_t) -> Result<T, i32>,
    {
        let ns = Self::c_name(namespace);
        let mut handle: nvs_handle_t = 0;
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };

        let ret = unsafe { nvs_open(ns.as_ptr() as *const _, mode, &mut handle) };
        if ret != ESP_OK {
            return Err(ret);
        }

        let result = f(handle);
        unsafe {
            nvs_close(handle);
        }
        result
    }

    /// Erase every key of `namespace` (factory reset of one subsystem).
    pub fn erase_namespace(&mut self, namespace: &str) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            self.store.borrow_mut().retain(|(ns, _), _| ns != namespace);
            info!("NvsAdapter: namespace '{}' erased", namespace);
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let result = Self::with_nvs_handle(namespace, true, |handle| {
                let ret = unsafe { nvs_erase_all(handle) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(())
            });
            match result {
                Ok(()) => {
                    info!("NvsAdapter: namespace '{}' erased", namespace);
                    Ok(())
                }
                // Never opened for writing, so there is nothing to erase.
                Err(e) if e == ESP_ERR_NVS_NOT_FOUND => Ok(()),
                Err(e) => {
                    warn!("NvsAdapter: erase of '{}' failed ({})", namespace, e);
                    Err(StorageError::IoError)
                }
            }
        }
    }
}

impl StoragePort for NvsAdapter {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            match self.store.borrow().get(&Self::sim_key(namespace, key)) {
                Some(data) => {
                    let len = data.len().min(buf.len());
                    buf[..len].copy_from_slice(&data[..len]);
                    Ok(len)
                }
                None => Err(StorageError::NotFound),
            }
        }

        #[cfg(target_os = "espidf")]
        {
            let result = Self::with_nvs_handle(namespace, false, |handle| {
                let key_buf = Self::c_name(key);
                let mut size = buf.len();
                let ret = unsafe {
                    nvs_get_blob(
                        handle,
                        key_buf.as_ptr() as *const _,
                        buf.as_mut_ptr() as *mut _,
                        &mut size,
                    )
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(size)
            });
            match result {
                Ok(size) => Ok(size),
                Err(e) if e == ESP_ERR_NVS_NOT_FOUND => Err(StorageError::NotFound),
                Err(_) => Err(StorageError::IoError),
            }
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            self.store
                .borrow_mut()
                .insert(Self::sim_key(namespace, key), data.to_vec());
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let result = Self::with_nvs_handle(namespace, true, |handle| {
                let key_buf = Self::c_name(key);
                let ret = unsafe {
                    nvs_set_blob(
                        handle,
                        key_buf.as_ptr() as *const _,
                        data.as_ptr() as *const _,
                        data.len(),
                    )
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(())
            });
            result.map_err(|e| {
                if e == ESP_ERR_NVS_NOT_ENOUGH_SPACE {
                    StorageError::Full
                } else {
                    StorageError::IoError
                }
            })
        }
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            self.store.borrow_mut().remove(&Self::sim_key(namespace, key));
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let result = Self::with_nvs_handle(namespace, true, |handle| {
                let key_buf = Self::c_name(key);
                let ret = unsafe { nvs_erase_key(handle, key_buf.as_ptr() as *const _) };
                if ret != ESP_OK && ret != ESP_ERR_NVS_NOT_FOUND {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(())
            });
            result.map_err(|_| StorageError::IoError)
        }
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        #[cfg(not(target_os = "espidf"))]
        {
            self.store
                .borrow()
                .contains_key(&Self::sim_key(namespace, key))
        }

        #[cfg(target_os = "espidf")]
        {
            let result = Self::with_nvs_handle(namespace, false, |handle| {
                let key_buf = Self::c_name(key);
                let ret = unsafe {
                    nvs_find_key(handle, key_buf.as_ptr() as *const _, core::ptr::null_mut())
                };
                Ok(ret == ESP_OK)
            });
            result.unwrap_or(false)
        }
    }
}
